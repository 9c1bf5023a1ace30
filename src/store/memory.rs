use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ContactStore, MembershipUpdate, StoreResult};
use crate::cohorts::{Cohort, CohortStatus, Participant, UserRecord};

#[derive(Default)]
struct Inner {
    cohorts: HashMap<String, Cohort>,
    participants: HashMap<i64, Participant>,
    users: HashMap<i64, UserRecord>,
}

/// In-memory reference store. One mutex guards all three collections,
/// which makes `increment_cohort_members` and `reset_cohort` genuinely
/// atomic: the critical section the trait contract asks for.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn insert_cohort(&self, cohort: Cohort) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.cohorts.contains_key(&cohort.id) {
            warn!(cohort_id = %cohort.id, "Cohort already exists, insert skipped");
            return Ok(false);
        }
        debug!(cohort_id = %cohort.id, capacity = cohort.capacity, "Inserted cohort");
        inner.cohorts.insert(cohort.id.clone(), cohort);
        Ok(true)
    }

    async fn find_cohort(&self, cohort_id: &str) -> StoreResult<Option<Cohort>> {
        let inner = self.inner.lock().await;
        Ok(inner.cohorts.get(cohort_id).cloned())
    }

    async fn find_unapproved_cohort_by_tier(&self, tier: u32) -> StoreResult<Option<Cohort>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .cohorts
            .values()
            .find(|c| c.capacity == tier && c.status != CohortStatus::Approved)
            .cloned())
    }

    async fn all_cohorts(&self) -> StoreResult<Vec<Cohort>> {
        let inner = self.inner.lock().await;
        Ok(inner.cohorts.values().cloned().collect())
    }

    async fn increment_cohort_members(&self, cohort_id: &str) -> StoreResult<MembershipUpdate> {
        let mut inner = self.inner.lock().await;
        let Some(cohort) = inner.cohorts.get_mut(cohort_id) else {
            return Ok(MembershipUpdate::Missing);
        };
        if cohort.member_count >= cohort.capacity {
            return Ok(MembershipUpdate::AtCapacity);
        }
        cohort.member_count += 1;
        if cohort.member_count >= cohort.capacity {
            cohort.status = CohortStatus::Full;
        }
        cohort.updated_at = Utc::now();
        debug!(
            cohort_id = %cohort_id,
            member_count = cohort.member_count,
            capacity = cohort.capacity,
            "Incremented cohort membership"
        );
        Ok(MembershipUpdate::Applied(cohort.clone()))
    }

    async fn set_cohort_status(&self, cohort_id: &str, status: CohortStatus) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.cohorts.get_mut(cohort_id) {
            Some(cohort) => {
                cohort.status = status;
                cohort.updated_at = Utc::now();
                Ok(true)
            }
            None => {
                warn!(cohort_id = %cohort_id, "No cohort found for status update");
                Ok(false)
            }
        }
    }

    async fn reset_cohort(&self, cohort_id: &str) -> StoreResult<bool> {
        // Count reset, status reset, and participant purge all happen
        // under the same lock, so no reader observes a half-reset cohort.
        let mut inner = self.inner.lock().await;
        if !inner.cohorts.contains_key(cohort_id) {
            warn!(cohort_id = %cohort_id, "No cohort found for reset");
            return Ok(false);
        }
        inner
            .participants
            .retain(|_, participant| participant.cohort_id != cohort_id);
        let cohort = inner
            .cohorts
            .get_mut(cohort_id)
            .expect("checked above under the same lock");
        cohort.member_count = 0;
        cohort.status = CohortStatus::Active;
        cohort.updated_at = Utc::now();
        debug!(cohort_id = %cohort_id, "Reset cohort and purged its participants");
        Ok(true)
    }

    async fn upsert_participant(&self, participant: Participant) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.participants.insert(participant.user_id, participant);
        Ok(())
    }

    async fn find_participant(&self, user_id: i64) -> StoreResult<Option<Participant>> {
        let inner = self.inner.lock().await;
        Ok(inner.participants.get(&user_id).cloned())
    }

    async fn participants_for_cohort(&self, cohort_id: &str) -> StoreResult<Vec<Participant>> {
        let inner = self.inner.lock().await;
        let mut participants: Vec<Participant> = inner
            .participants
            .values()
            .filter(|p| p.cohort_id == cohort_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.submitted_at);
        Ok(participants)
    }

    async fn register_user(&self, user_id: i64) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.users.contains_key(&user_id) {
            return Ok(false);
        }
        // New users start unsubscribed; the gating flow flips the flag
        // once its precondition passes.
        inner.users.insert(
            user_id,
            UserRecord {
                id: user_id,
                subscribed: false,
                registered_at: Utc::now(),
            },
        );
        debug!(user_id, "Registered user");
        Ok(true)
    }

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<UserRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&user_id).cloned())
    }

    async fn set_user_subscribed(&self, user_id: i64, subscribed: bool) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(&user_id) {
            Some(user) => {
                user.subscribed = subscribed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn all_user_ids(&self) -> StoreResult<Vec<i64>> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<i64> = inner.users.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn count_users(&self) -> StoreResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.users.len() as u64)
    }
}
