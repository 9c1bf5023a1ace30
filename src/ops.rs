// Operator panel: group administration, stats, and the broadcast
// prompt flow. Every entry point checks the static allow-list first.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::approval::{ApprovalOutcome, ApprovalProcessor};
use crate::broadcast::{BroadcastReport, Broadcaster, CancelFlag, ProgressSink};
use crate::cohorts::{Cohort, CohortManager};
use crate::config::OperatorConfig;
use crate::error::{Result, RoundupError};
use crate::transport::OutboundMessage;

/// One rendered page of the group stats view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsPage {
    pub body: String,
    pub page: usize,
    pub total_pages: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

pub struct OpsPanel {
    manager: Arc<CohortManager>,
    approval: Arc<ApprovalProcessor>,
    broadcaster: Arc<Broadcaster>,
    operators: OperatorConfig,
    /// Operators who asked to broadcast and owe us a payload message.
    pending_broadcasts: Mutex<HashSet<i64>>,
}

impl OpsPanel {
    pub fn new(
        manager: Arc<CohortManager>,
        approval: Arc<ApprovalProcessor>,
        broadcaster: Arc<Broadcaster>,
        operators: OperatorConfig,
    ) -> Self {
        Self {
            manager,
            approval,
            broadcaster,
            operators,
            pending_broadcasts: Mutex::new(HashSet::new()),
        }
    }

    fn authorize(&self, user_id: i64) -> Result<()> {
        if self.operators.allowed_ids.contains(&user_id) {
            Ok(())
        } else {
            warn!(user_id, "Rejected non-operator command");
            Err(RoundupError::Validation(
                "You are not authorized to use this command.".into(),
            ))
        }
    }

    /// Create the cohort for a capacity tier. Rejects a tier that
    /// already has a non-approved cohort instead of silently reusing it.
    pub async fn add_group(&self, operator_id: i64, tier: u32) -> Result<Cohort> {
        self.authorize(operator_id)?;
        if tier == 0 {
            return Err(RoundupError::Validation(
                "Group size must be a positive number.".into(),
            ));
        }
        if let Some(existing) = self
            .manager
            .store()
            .find_unapproved_cohort_by_tier(tier)
            .await?
        {
            return Err(RoundupError::Validation(format!(
                "Group {} already exists and is not yet approved.",
                existing.id
            )));
        }
        let cohort = self.manager.get_or_create_active_cohort(tier).await?;
        info!(operator_id, cohort_id = %cohort.id, "Operator created group");
        Ok(cohort)
    }

    pub async fn approve_group(
        &self,
        operator_id: i64,
        cohort_id: &str,
        cancel: &CancelFlag,
    ) -> Result<ApprovalOutcome> {
        self.authorize(operator_id)?;
        info!(operator_id, cohort_id = %cohort_id, "Operator triggered approval");
        self.approval.approve(cohort_id, cancel).await
    }

    pub async fn list_groups(&self, operator_id: i64) -> Result<Vec<Cohort>> {
        self.authorize(operator_id)?;
        self.manager.list_active().await
    }

    /// Paginated stats over every cohort, fixed page size, oldest tier
    /// first. `page` is one-based; an out-of-range page clamps to the
    /// last page.
    pub async fn group_stats(&self, operator_id: i64, page: usize) -> Result<StatsPage> {
        self.authorize(operator_id)?;

        let cohorts = self.manager.all().await?;
        if cohorts.is_empty() {
            return Ok(StatsPage {
                body: "No groups found.".into(),
                page: 1,
                total_pages: 1,
                has_prev: false,
                has_next: false,
            });
        }

        let page_size = self.operators.stats_page_size.max(1);
        let total_pages = cohorts.len().div_ceil(page_size);
        let page = page.clamp(1, total_pages);

        let mut body = String::from("📊 Group Stats\n\n");
        for cohort in cohorts.iter().skip((page - 1) * page_size).take(page_size) {
            body.push_str(&format!(
                "🆔 {}\n👥 Members: {}/{}\n📌 Status: {}\n\n",
                cohort.id, cohort.member_count, cohort.capacity, cohort.status
            ));
        }
        body.push_str(&format!(
            "Page {}/{} | Total Groups: {}",
            page,
            total_pages,
            cohorts.len()
        ));

        Ok(StatsPage {
            body,
            page,
            total_pages,
            has_prev: page > 1,
            has_next: page < total_pages,
        })
    }

    /// Arm the broadcast prompt: the operator's next text message is the
    /// payload. Re-arming is a no-op.
    pub async fn request_broadcast(&self, operator_id: i64) -> Result<()> {
        self.authorize(operator_id)?;
        self.pending_broadcasts.lock().await.insert(operator_id);
        info!(operator_id, "Broadcast prompt armed");
        Ok(())
    }

    pub async fn has_pending_broadcast(&self, operator_id: i64) -> bool {
        self.pending_broadcasts.lock().await.contains(&operator_id)
    }

    pub async fn cancel_broadcast_prompt(&self, operator_id: i64) {
        self.pending_broadcasts.lock().await.remove(&operator_id);
    }

    /// Consume the pending prompt and fan the payload out to every
    /// registered user. Progress and the final summary go to `sink`.
    pub async fn run_broadcast(
        &self,
        operator_id: i64,
        payload: &str,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<BroadcastReport> {
        self.authorize(operator_id)?;
        if !self.pending_broadcasts.lock().await.remove(&operator_id) {
            return Err(RoundupError::Validation(
                "No broadcast in progress. Send /broadcast first.".into(),
            ));
        }

        let recipients = self.manager.store().all_user_ids().await?;
        info!(
            operator_id,
            recipients = recipients.len(),
            "Broadcast payload received, fanning out"
        );
        let message = OutboundMessage::text(payload);
        Ok(self
            .broadcaster
            .run(&message, recipients, sink, cancel)
            .await)
    }

    pub async fn user_count(&self, operator_id: i64) -> Result<u64> {
        self.authorize(operator_id)?;
        Ok(self.manager.store().count_users().await?)
    }
}
