// Approval orchestration: snapshot, encode, upload, notify, recycle.
// Once the artifact is uploaded the run is committed; notification
// failures degrade to counts and never roll the approval back.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::broadcast::{BroadcastCounts, Broadcaster, CancelFlag, LogProgressSink};
use crate::cohorts::{CohortManager, CohortStatus, Participant};
use crate::config::DistributionConfig;
use crate::encoder::ContactEncoder;
use crate::error::{Result, RoundupError};
use crate::telemetry::{create_cohort_span, generate_correlation_id};
use crate::transport::{ArtifactLocator, ChatTransport, OutboundMessage};

/// Summary of a completed approval run.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub cohort_id: String,
    pub total_participants: usize,
    pub locator: ArtifactLocator,
    pub notification_counts: BroadcastCounts,
}

pub struct ApprovalProcessor {
    manager: Arc<CohortManager>,
    transport: Arc<dyn ChatTransport>,
    encoder: Arc<dyn ContactEncoder>,
    broadcaster: Arc<Broadcaster>,
    distribution: DistributionConfig,
}

impl ApprovalProcessor {
    pub fn new(
        manager: Arc<CohortManager>,
        transport: Arc<dyn ChatTransport>,
        encoder: Arc<dyn ContactEncoder>,
        broadcaster: Arc<Broadcaster>,
        distribution: DistributionConfig,
    ) -> Self {
        Self {
            manager,
            transport,
            encoder,
            broadcaster,
            distribution,
        }
    }

    /// Run the full approval pipeline for one cohort:
    /// snapshot participants, encode the contact file, upload it to the
    /// distribution destination, notify every participant with the
    /// download link, then mark the cohort approved and recycle it for a
    /// fresh round.
    ///
    /// Steps up to and including the upload are fatal on failure and
    /// leave the cohort untouched. From notification onward the run
    /// always proceeds to the recycle.
    pub async fn approve(&self, cohort_id: &str, cancel: &CancelFlag) -> Result<ApprovalOutcome> {
        let correlation_id = generate_correlation_id();
        let span = create_cohort_span("approve", Some(cohort_id), None, Some(&correlation_id));
        let _guard = span.enter();

        let cohort = self.manager.get(cohort_id).await?;
        if cohort.status == CohortStatus::Approved {
            return Err(RoundupError::Validation(format!(
                "Group {cohort_id} is already approved."
            )));
        }

        let participants = self
            .manager
            .store()
            .participants_for_cohort(cohort_id)
            .await?;
        if participants.is_empty() {
            return Err(RoundupError::Validation(format!(
                "Group {cohort_id} has no submissions to approve."
            )));
        }
        info!(
            cohort_id = %cohort_id,
            participants = participants.len(),
            "Approval snapshot taken"
        );

        let artifact = self
            .encoder
            .encode(cohort_id, cohort.tier(), &participants)?;

        let locator = self
            .transport
            .upload_artifact(&self.distribution.destination, &artifact)
            .await
            .map_err(|e| {
                error!(cohort_id = %cohort_id, error = %e, "Artifact upload failed");
                RoundupError::Transport(e)
            })?;
        info!(
            cohort_id = %cohort_id,
            destination = %self.distribution.destination,
            url = %locator.url,
            "Contact file uploaded"
        );

        let counts = self
            .notify_participants(cohort_id, &participants, &locator, cancel)
            .await;
        if counts.success < participants.len() {
            warn!(
                cohort_id = %cohort_id,
                notified = counts.success,
                total = participants.len(),
                "Some participants were not notified"
            );
        }

        self.manager.mark_approved(cohort_id).await?;
        self.manager.recycle(cohort_id).await?;

        Ok(ApprovalOutcome {
            cohort_id: cohort_id.to_string(),
            total_participants: participants.len(),
            locator,
            notification_counts: counts,
        })
    }

    async fn notify_participants(
        &self,
        cohort_id: &str,
        participants: &[Participant],
        locator: &ArtifactLocator,
        cancel: &CancelFlag,
    ) -> BroadcastCounts {
        let message = OutboundMessage::with_link(
            format!(
                "🎉 Group {cohort_id} has been approved!\nYour contact file is ready for download."
            ),
            "📥 Download VCF",
            locator.url.clone(),
        );
        let recipients: Vec<i64> = participants.iter().map(|p| p.user_id).collect();
        let report = self
            .broadcaster
            .run(&message, recipients, &LogProgressSink, cancel)
            .await;
        report.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::config::BroadcastConfig;
    use crate::encoder::VcfEncoder;
    use crate::store::{ContactStore, MemoryStore};
    use crate::transport::{ContactArtifact, SendOutcome, TransportError};

    struct FakeTransport {
        uploads: Mutex<Vec<(String, String)>>,
        sends: Mutex<Vec<i64>>,
        fail_upload: bool,
    }

    impl FakeTransport {
        fn new(fail_upload: bool) -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                sends: Mutex::new(Vec::new()),
                fail_upload,
            }
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn send_direct(&self, recipient: i64, message: &OutboundMessage) -> SendOutcome {
            assert!(message.link.is_some(), "notification must carry the link");
            self.sends.lock().unwrap().push(recipient);
            if recipient == 13 {
                SendOutcome::Blocked
            } else {
                SendOutcome::Delivered
            }
        }

        async fn upload_artifact(
            &self,
            destination: &str,
            artifact: &ContactArtifact,
        ) -> std::result::Result<ArtifactLocator, TransportError> {
            if self.fail_upload {
                return Err(TransportError::UploadFailed {
                    destination: destination.to_string(),
                    reason: "channel rejected the file".into(),
                });
            }
            self.uploads
                .lock()
                .unwrap()
                .push((destination.to_string(), artifact.file_name.clone()));
            Ok(ArtifactLocator {
                url: format!("https://files.example/{}", artifact.file_name),
            })
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        manager: Arc<CohortManager>,
        transport: Arc<FakeTransport>,
        processor: ApprovalProcessor,
    }

    fn harness(fail_upload: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(CohortManager::new(store.clone()));
        let transport = Arc::new(FakeTransport::new(fail_upload));
        let broadcaster = Arc::new(Broadcaster::new(
            transport.clone(),
            &BroadcastConfig {
                progress_interval: 20,
                sends_per_second: 10_000,
                burst_capacity: 10_000,
            },
        ));
        let processor = ApprovalProcessor::new(
            manager.clone(),
            transport.clone(),
            Arc::new(VcfEncoder::new("")),
            broadcaster,
            DistributionConfig {
                destination: "@vcfdownload".into(),
                watermark: String::new(),
            },
        );
        Harness {
            store,
            manager,
            transport,
            processor,
        }
    }

    async fn seed_cohort(h: &Harness, tier: u32, users: &[i64]) -> String {
        let cohort = h.manager.get_or_create_active_cohort(tier).await.unwrap();
        for &user_id in users {
            h.manager.increment_membership(&cohort.id).await.unwrap();
            h.store
                .upsert_participant(Participant {
                    user_id,
                    display_name: format!("User {user_id}"),
                    phone_number: format!("+25678700{user_id:04}"),
                    cohort_id: cohort.id.clone(),
                    submitted_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        cohort.id
    }

    #[tokio::test]
    async fn approve_uploads_notifies_and_recycles() {
        let h = harness(false);
        let cohort_id = seed_cohort(&h, 10, &[11, 12, 13]).await;

        let outcome = h
            .processor
            .approve(&cohort_id, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome.total_participants, 3);
        assert_eq!(outcome.notification_counts.success, 2);
        assert_eq!(outcome.notification_counts.blocked, 1);
        assert_eq!(h.transport.uploads.lock().unwrap().len(), 1);
        assert_eq!(h.transport.sends.lock().unwrap().len(), 3);

        // Recycled: counter zeroed, active again, snapshot purged.
        let cohort = h.manager.get(&cohort_id).await.unwrap();
        assert_eq!(cohort.member_count, 0);
        assert_eq!(cohort.status, CohortStatus::Active);
        assert!(h
            .store
            .participants_for_cohort(&cohort_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn empty_cohort_is_rejected_before_any_io() {
        let h = harness(false);
        let cohort = h.manager.get_or_create_active_cohort(10).await.unwrap();

        let err = h
            .processor
            .approve(&cohort.id, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoundupError::Validation(_)));
        assert!(h.transport.uploads.lock().unwrap().is_empty());
        assert!(h.transport.sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_aborts_without_state_change() {
        let h = harness(true);
        let cohort_id = seed_cohort(&h, 10, &[11, 12]).await;

        let err = h
            .processor
            .approve(&cohort_id, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoundupError::Transport(_)));
        assert!(h.transport.sends.lock().unwrap().is_empty());

        // Untouched: still holds its members and submissions.
        let cohort = h.manager.get(&cohort_id).await.unwrap();
        assert_eq!(cohort.member_count, 2);
        assert_eq!(
            h.store
                .participants_for_cohort(&cohort_id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn double_approval_is_rejected_with_zero_sends() {
        let h = harness(false);
        let cohort_id = seed_cohort(&h, 1, &[11]).await;
        h.manager.mark_approved(&cohort_id).await.unwrap();

        let err = h
            .processor
            .approve(&cohort_id, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoundupError::Validation(_)));
        assert!(h.transport.sends.lock().unwrap().is_empty());
        assert!(h.transport.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notification_failures_do_not_block_the_recycle() {
        let h = harness(false);
        // Recipient 13 is scripted to be Blocked.
        let cohort_id = seed_cohort(&h, 10, &[13]).await;

        let outcome = h
            .processor
            .approve(&cohort_id, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(outcome.notification_counts.success, 0);
        assert_eq!(outcome.notification_counts.blocked, 1);

        let cohort = h.manager.get(&cohort_id).await.unwrap();
        assert_eq!(cohort.status, CohortStatus::Active);
        assert_eq!(cohort.member_count, 0);
    }
}
