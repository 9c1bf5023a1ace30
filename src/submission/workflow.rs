use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use statig::prelude::*;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cohorts::{Cohort, CohortManager, Participant};
use crate::error::{Result, RoundupError};

use super::machine::{SubmissionEvent, SubmissionMachine, SubmissionPhase};
use super::parser::{parse_details, SubmissionDetails};

/// What the caller should show the user after a workflow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStep {
    /// Session opened; offer the available cohorts.
    SelectionPrompt { cohorts: Vec<Cohort> },
    /// Cohort reserved; prompt for the Name/Number details.
    DetailsPrompt { cohort: Cohort },
    /// Details captured; echo them back for confirmation.
    ConfirmationPrompt { cohort_id: String, details: SubmissionDetails },
    /// Participant persisted. Carries the cohort as written by the
    /// membership increment (count and possible Full flip included).
    Confirmed { cohort: Cohort },
    /// Terminal notice: the chosen cohort has no room.
    CohortFull { cohort_id: String },
    /// Session discarded with no mutation.
    Cancelled,
}

/// Per-user submission workflow. Exactly one in-flight session per user:
/// starting a new submission tears down any prior session (and with it
/// any pending prompt) before installing the new one.
pub struct SubmissionWorkflow {
    manager: Arc<CohortManager>,
    sessions: Mutex<HashMap<i64, StateMachine<SubmissionMachine>>>,
}

impl SubmissionWorkflow {
    pub fn new(manager: Arc<CohortManager>) -> Self {
        Self {
            manager,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or supersede) the user's session and return the cohorts to
    /// choose from.
    pub async fn start(&self, user_id: i64) -> Result<SubmissionStep> {
        let cohorts = self.manager.all().await?;

        let mut sessions = self.sessions.lock().await;
        if sessions.remove(&user_id).is_some() {
            info!(user_id, "Superseded existing submission session");
        }
        let mut machine = SubmissionMachine::new(user_id).state_machine();
        machine.handle(&SubmissionEvent::Start);
        sessions.insert(user_id, machine);

        Ok(SubmissionStep::SelectionPrompt { cohorts })
    }

    /// Reserve/fetch the tier's active cohort and advance to details
    /// entry. A full cohort routes to the terminal notice and closes the
    /// session instead of advancing.
    pub async fn select_tier(&self, user_id: i64, tier: u32) -> Result<SubmissionStep> {
        {
            let sessions = self.sessions.lock().await;
            let machine = sessions
                .get(&user_id)
                .ok_or_else(session_expired)?;
            if machine.inner().phase() != SubmissionPhase::AwaitingSelection {
                return Err(session_expired());
            }
        }

        let cohort = self.manager.get_or_create_active_cohort(tier).await?;
        if cohort.is_full() {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&user_id);
            return Ok(SubmissionStep::CohortFull { cohort_id: cohort.id });
        }

        let mut sessions = self.sessions.lock().await;
        let machine = sessions.get_mut(&user_id).ok_or_else(session_expired)?;
        machine.handle(&SubmissionEvent::SelectCohort {
            cohort_id: cohort.id.clone(),
        });
        Ok(SubmissionStep::DetailsPrompt { cohort })
    }

    /// Validate and capture the two-line details message. A malformed
    /// message leaves the session in awaiting-details and mutates
    /// nothing.
    pub async fn submit_details(&self, user_id: i64, text: &str) -> Result<SubmissionStep> {
        let mut sessions = self.sessions.lock().await;
        let machine = sessions.get_mut(&user_id).ok_or_else(session_expired)?;
        if machine.inner().phase() != SubmissionPhase::AwaitingDetails {
            return Err(session_expired());
        }

        let details = parse_details(text)?;
        machine.handle(&SubmissionEvent::Details {
            display_name: details.display_name.clone(),
            phone_number: details.phone_number.clone(),
        });
        let cohort_id = machine
            .inner()
            .cohort_id
            .clone()
            .ok_or_else(session_expired)?;
        Ok(SubmissionStep::ConfirmationPrompt { cohort_id, details })
    }

    /// Finalize: reserve capacity first, persist the participant only on
    /// success. A failed increment writes nothing, so a full cohort can
    /// never accrete orphaned participants.
    pub async fn confirm(&self, user_id: i64) -> Result<SubmissionStep> {
        // Claim the session while holding the lock. A concurrent confirm
        // from the same user finds no session and cannot spend a second
        // capacity slot on one participant.
        let mut machine = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&user_id) {
                Some(m) if m.inner().phase() == SubmissionPhase::AwaitingConfirmation => {}
                _ => return Err(session_expired()),
            }
            sessions.remove(&user_id).ok_or_else(session_expired)?
        };

        let (cohort_id, details) = {
            let ctx = machine.inner();
            match (&ctx.cohort_id, &ctx.display_name, &ctx.phone_number) {
                (Some(cohort_id), Some(display_name), Some(phone_number)) => (
                    cohort_id.clone(),
                    SubmissionDetails {
                        display_name: display_name.clone(),
                        phone_number: phone_number.clone(),
                    },
                ),
                _ => return Err(session_expired()),
            }
        };

        let cohort = match self.manager.increment_membership(&cohort_id).await {
            Ok(cohort) => cohort,
            Err(err @ RoundupError::CapacityConflict { .. }) => {
                // The claimed session is dropped: same teardown a cancel
                // would do.
                warn!(user_id, cohort_id = %cohort_id, "Cohort filled before confirmation");
                return Err(err);
            }
            Err(other) => {
                // Transient store trouble: hand the session back for a
                // retry unless a newer one superseded it meanwhile.
                let mut sessions = self.sessions.lock().await;
                sessions.entry(user_id).or_insert(machine);
                return Err(other);
            }
        };

        self.manager
            .store()
            .upsert_participant(Participant {
                user_id,
                display_name: details.display_name,
                phone_number: details.phone_number,
                cohort_id: cohort_id.clone(),
                submitted_at: Utc::now(),
            })
            .await?;

        machine.handle(&SubmissionEvent::Confirm);

        info!(user_id, cohort_id = %cohort_id, "Submission confirmed and persisted");
        Ok(SubmissionStep::Confirmed { cohort })
    }

    /// Discard the session from any state. No mutation.
    pub async fn cancel(&self, user_id: i64) -> SubmissionStep {
        self.teardown(user_id).await;
        SubmissionStep::Cancelled
    }

    /// The user's current submission (if any) with its cohort, for the
    /// my-submissions view.
    pub async fn my_submission(&self, user_id: i64) -> Result<Option<(Participant, Cohort)>> {
        let Some(participant) = self.manager.store().find_participant(user_id).await? else {
            return Ok(None);
        };
        let cohort = self.manager.get(&participant.cohort_id).await?;
        Ok(Some((participant, cohort)))
    }

    pub async fn has_session(&self, user_id: i64) -> bool {
        self.sessions.lock().await.contains_key(&user_id)
    }

    /// The phase of the user's session, if one exists. Lets the router
    /// decide whether free text belongs to a details prompt.
    pub async fn session_phase(&self, user_id: i64) -> Option<SubmissionPhase> {
        let sessions = self.sessions.lock().await;
        sessions.get(&user_id).map(|m| m.inner().phase())
    }

    async fn teardown(&self, user_id: i64) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(&user_id).is_some() {
            info!(user_id, "Submission session torn down");
        }
    }
}

fn session_expired() -> RoundupError {
    RoundupError::Validation("Session expired. Please start again by selecting a group.".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::{mpsc, Semaphore};

    use crate::cohorts::{CohortStatus, UserRecord};
    use crate::store::{ContactStore, MemoryStore, MembershipUpdate, StoreResult};

    fn workflow() -> SubmissionWorkflow {
        let store = Arc::new(MemoryStore::new());
        SubmissionWorkflow::new(Arc::new(CohortManager::new(store)))
    }

    /// Store wrapper that parks inside the membership increment until
    /// the test releases it, so two confirms can be interleaved
    /// deterministically.
    struct GatedStore {
        inner: MemoryStore,
        gate: Arc<Semaphore>,
        entered: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl ContactStore for GatedStore {
        async fn insert_cohort(&self, cohort: Cohort) -> StoreResult<bool> {
            self.inner.insert_cohort(cohort).await
        }

        async fn find_cohort(&self, cohort_id: &str) -> StoreResult<Option<Cohort>> {
            self.inner.find_cohort(cohort_id).await
        }

        async fn find_unapproved_cohort_by_tier(&self, tier: u32) -> StoreResult<Option<Cohort>> {
            self.inner.find_unapproved_cohort_by_tier(tier).await
        }

        async fn all_cohorts(&self) -> StoreResult<Vec<Cohort>> {
            self.inner.all_cohorts().await
        }

        async fn increment_cohort_members(
            &self,
            cohort_id: &str,
        ) -> StoreResult<MembershipUpdate> {
            self.entered.send(()).unwrap();
            self.gate.acquire().await.unwrap().forget();
            self.inner.increment_cohort_members(cohort_id).await
        }

        async fn set_cohort_status(
            &self,
            cohort_id: &str,
            status: CohortStatus,
        ) -> StoreResult<bool> {
            self.inner.set_cohort_status(cohort_id, status).await
        }

        async fn reset_cohort(&self, cohort_id: &str) -> StoreResult<bool> {
            self.inner.reset_cohort(cohort_id).await
        }

        async fn upsert_participant(&self, participant: Participant) -> StoreResult<()> {
            self.inner.upsert_participant(participant).await
        }

        async fn find_participant(&self, user_id: i64) -> StoreResult<Option<Participant>> {
            self.inner.find_participant(user_id).await
        }

        async fn participants_for_cohort(&self, cohort_id: &str) -> StoreResult<Vec<Participant>> {
            self.inner.participants_for_cohort(cohort_id).await
        }

        async fn register_user(&self, user_id: i64) -> StoreResult<bool> {
            self.inner.register_user(user_id).await
        }

        async fn find_user(&self, user_id: i64) -> StoreResult<Option<UserRecord>> {
            self.inner.find_user(user_id).await
        }

        async fn set_user_subscribed(&self, user_id: i64, subscribed: bool) -> StoreResult<bool> {
            self.inner.set_user_subscribed(user_id, subscribed).await
        }

        async fn all_user_ids(&self) -> StoreResult<Vec<i64>> {
            self.inner.all_user_ids().await
        }

        async fn count_users(&self) -> StoreResult<u64> {
            self.inner.count_users().await
        }
    }

    async fn drive_to_confirmation(wf: &SubmissionWorkflow, user_id: i64, tier: u32) {
        wf.start(user_id).await.unwrap();
        wf.select_tier(user_id, tier).await.unwrap();
        wf.submit_details(user_id, "Name: John Doe\nNumber: +256787000001")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_details_keep_session_in_awaiting_details() {
        let wf = workflow();
        wf.start(1).await.unwrap();
        wf.select_tier(1, 10).await.unwrap();

        let err = wf.submit_details(1, "Name: John Doe").await.unwrap_err();
        assert!(matches!(err, RoundupError::Validation(_)));
        assert_eq!(wf.session_phase(1).await, Some(SubmissionPhase::AwaitingDetails));
        assert!(wf.my_submission(1).await.unwrap().is_none());

        // The session is still usable after the error.
        let step = wf
            .submit_details(1, "Name: John Doe\nNumber: +256787000001")
            .await
            .unwrap();
        assert!(matches!(step, SubmissionStep::ConfirmationPrompt { .. }));
    }

    #[tokio::test]
    async fn confirm_persists_participant_and_bumps_count() {
        let wf = workflow();
        drive_to_confirmation(&wf, 1, 10).await;

        let step = wf.confirm(1).await.unwrap();
        let SubmissionStep::Confirmed { cohort } = step else {
            panic!("expected Confirmed");
        };
        assert_eq!(cohort.member_count, 1);

        let (participant, _) = wf.my_submission(1).await.unwrap().unwrap();
        assert_eq!(participant.display_name, "John Doe");
        assert!(!wf.has_session(1).await);
    }

    #[tokio::test]
    async fn full_cohort_routes_to_terminal_notice_on_selection() {
        let wf = workflow();
        drive_to_confirmation(&wf, 1, 1).await;
        wf.confirm(1).await.unwrap();

        let step = wf.start(2).await.unwrap();
        assert!(matches!(step, SubmissionStep::SelectionPrompt { .. }));
        let step = wf.select_tier(2, 1).await.unwrap();
        assert!(matches!(step, SubmissionStep::CohortFull { .. }));
        assert!(!wf.has_session(2).await);
    }

    #[tokio::test]
    async fn concurrent_confirms_from_one_user_spend_one_slot() {
        let gate = Arc::new(Semaphore::new(0));
        let (entered, mut entries) = mpsc::unbounded_channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: gate.clone(),
            entered,
        });
        let manager = Arc::new(CohortManager::new(store));
        let wf = Arc::new(SubmissionWorkflow::new(manager.clone()));

        wf.start(1).await.unwrap();
        wf.select_tier(1, 10).await.unwrap();
        wf.submit_details(1, "Name: John Doe\nNumber: +256787000001")
            .await
            .unwrap();

        let first = tokio::spawn({
            let wf = wf.clone();
            async move { wf.confirm(1).await }
        });
        // Wait until the first confirm is parked inside the increment,
        // then race a second confirm for the same user against it.
        entries.recv().await.unwrap();
        let second = wf.confirm(1).await;
        assert!(matches!(second, Err(RoundupError::Validation(_))));

        gate.add_permits(2);
        let step = first.await.unwrap().unwrap();
        assert!(matches!(step, SubmissionStep::Confirmed { .. }));

        // One participant, one slot.
        let cohort = manager.get("ID-XP10GROUP").await.unwrap();
        assert_eq!(cohort.member_count, 1);
        assert!(wf.my_submission(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn confirm_races_surface_capacity_conflict_without_persisting() {
        let wf = workflow();
        drive_to_confirmation(&wf, 1, 1).await;
        drive_to_confirmation(&wf, 2, 1).await;

        wf.confirm(1).await.unwrap();
        let err = wf.confirm(2).await.unwrap_err();
        assert!(matches!(err, RoundupError::CapacityConflict { .. }));
        assert!(wf.my_submission(2).await.unwrap().is_none());
        assert!(!wf.has_session(2).await);
    }

    #[tokio::test]
    async fn new_start_supersedes_previous_session() {
        let wf = workflow();
        drive_to_confirmation(&wf, 1, 10).await;

        // Starting over discards the pending confirmation.
        wf.start(1).await.unwrap();
        assert_eq!(wf.session_phase(1).await, Some(SubmissionPhase::AwaitingSelection));
        let err = wf.confirm(1).await.unwrap_err();
        assert!(matches!(err, RoundupError::Validation(_)));
    }

    #[tokio::test]
    async fn cancel_discards_session_without_mutation() {
        let wf = workflow();
        drive_to_confirmation(&wf, 1, 10).await;

        assert_eq!(wf.cancel(1).await, SubmissionStep::Cancelled);
        assert!(!wf.has_session(1).await);
        assert!(wf.my_submission(1).await.unwrap().is_none());

        let cohort = wf.manager.get_or_create_active_cohort(10).await.unwrap();
        assert_eq!(cohort.member_count, 0);
    }

    #[tokio::test]
    async fn reconfirmation_overwrites_prior_submission() {
        let wf = workflow();
        drive_to_confirmation(&wf, 1, 10).await;
        wf.confirm(1).await.unwrap();

        // Same user submits to a different tier; participant row moves.
        wf.start(1).await.unwrap();
        wf.select_tier(1, 20).await.unwrap();
        wf.submit_details(1, "Name: John Doe\nNumber: +256787000002")
            .await
            .unwrap();
        wf.confirm(1).await.unwrap();

        let (participant, cohort) = wf.my_submission(1).await.unwrap().unwrap();
        assert_eq!(participant.phone_number, "+256787000002");
        assert_eq!(cohort.capacity, 20);
    }
}
