use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, RoundupError};
use crate::store::{ContactStore, MembershipUpdate};

use super::{cohort_id_for_tier, Cohort, CohortStatus};

/// Bounded retries for CAS-style backends where a concurrent increment
/// can fail transiently without the cohort actually being full.
const INCREMENT_RETRIES: u32 = 3;

/// Owns cohort records and capacity arithmetic. All mutation funnels
/// through the store's atomic operations; the manager never does a
/// read-then-write on member_count.
pub struct CohortManager {
    store: Arc<dyn ContactStore>,
}

impl CohortManager {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Idempotent: returns the existing Active/Full cohort for the tier,
    /// or creates a fresh one. Never creates a duplicate for a tier that
    /// already has a non-approved cohort.
    pub async fn get_or_create_active_cohort(&self, tier: u32) -> Result<Cohort> {
        if tier == 0 {
            return Err(RoundupError::Validation(
                "cohort capacity must be a positive integer".into(),
            ));
        }
        if let Some(cohort) = self.store.find_unapproved_cohort_by_tier(tier).await? {
            return Ok(cohort);
        }

        let cohort = Cohort::new(tier);
        if self.store.insert_cohort(cohort.clone()).await? {
            info!(cohort_id = %cohort.id, tier, "Created cohort for tier");
            return Ok(cohort);
        }
        // Lost an insert race or the id is occupied by an approved
        // record that was re-activated concurrently; re-read.
        self.store
            .find_unapproved_cohort_by_tier(tier)
            .await?
            .ok_or_else(|| RoundupError::not_found("cohort", cohort_id_for_tier(tier)))
    }

    pub async fn get(&self, cohort_id: &str) -> Result<Cohort> {
        self.store
            .find_cohort(cohort_id)
            .await?
            .ok_or_else(|| RoundupError::not_found("cohort", cohort_id))
    }

    /// Atomically reserve one membership slot. Returns the cohort as
    /// written on success. `CapacityConflict` means the cohort filled
    /// (or was already full); `NotFound` means no such cohort.
    pub async fn increment_membership(&self, cohort_id: &str) -> Result<Cohort> {
        for attempt in 0..INCREMENT_RETRIES {
            match self.store.increment_cohort_members(cohort_id).await {
                Ok(MembershipUpdate::Applied(cohort)) => {
                    info!(
                        cohort_id = %cohort_id,
                        member_count = cohort.member_count,
                        status = %cohort.status,
                        "Reserved membership slot"
                    );
                    return Ok(cohort);
                }
                Ok(MembershipUpdate::AtCapacity) => {
                    return Err(RoundupError::CapacityConflict {
                        cohort_id: cohort_id.to_string(),
                    });
                }
                Ok(MembershipUpdate::Missing) => {
                    return Err(RoundupError::not_found("cohort", cohort_id));
                }
                Err(e) if attempt + 1 < INCREMENT_RETRIES => {
                    warn!(
                        cohort_id = %cohort_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Membership increment failed, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        unreachable!("increment loop either returns or errors on the last attempt")
    }

    /// Non-approved cohorts, sorted by capacity ascending.
    pub async fn list_active(&self) -> Result<Vec<Cohort>> {
        let mut cohorts: Vec<Cohort> = self
            .store
            .all_cohorts()
            .await?
            .into_iter()
            .filter(|c| c.status == CohortStatus::Active)
            .collect();
        cohorts.sort_by_key(|c| c.capacity);
        Ok(cohorts)
    }

    pub async fn all(&self) -> Result<Vec<Cohort>> {
        let mut cohorts = self.store.all_cohorts().await?;
        cohorts.sort_by_key(|c| c.capacity);
        Ok(cohorts)
    }

    pub async fn mark_approved(&self, cohort_id: &str) -> Result<()> {
        if !self
            .store
            .set_cohort_status(cohort_id, CohortStatus::Approved)
            .await?
        {
            return Err(RoundupError::not_found("cohort", cohort_id));
        }
        Ok(())
    }

    /// Reset the cohort for a new round: zero members, Active status,
    /// participants purged. Idempotent.
    pub async fn recycle(&self, cohort_id: &str) -> Result<()> {
        if !self.store.reset_cohort(cohort_id).await? {
            return Err(RoundupError::not_found("cohort", cohort_id));
        }
        info!(cohort_id = %cohort_id, "Recycled cohort for reuse");
        Ok(())
    }
}
