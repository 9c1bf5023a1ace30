// Document-store seam. The production deployment points this at a real
// document database; the crate ships an in-memory reference store that
// honors the same atomicity contract.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::cohorts::{Cohort, CohortStatus, Participant, UserRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    Operation(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of the atomic conditional membership increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipUpdate {
    /// The increment committed. Carries the cohort as written, including
    /// the Full status flip when the increment reached capacity.
    Applied(Cohort),
    /// The cohort was already at (or over) capacity; nothing was written.
    AtCapacity,
    /// No cohort with that id exists.
    Missing,
}

/// Durable key-value/document CRUD with the one correctness-critical
/// operation this system needs from its storage layer:
/// `increment_cohort_members` must be an atomic conditional update
/// (compare-and-increment or an equivalent per-cohort critical
/// section). A read-then-write implementation is a contract violation:
/// it permits capacity overshoot under concurrent confirms.
#[async_trait]
pub trait ContactStore: Send + Sync {
    // ── cohorts ──────────────────────────────────────────────

    async fn insert_cohort(&self, cohort: Cohort) -> StoreResult<bool>;

    async fn find_cohort(&self, cohort_id: &str) -> StoreResult<Option<Cohort>>;

    /// The single non-approved cohort for a tier, if one exists.
    async fn find_unapproved_cohort_by_tier(&self, tier: u32) -> StoreResult<Option<Cohort>>;

    async fn all_cohorts(&self) -> StoreResult<Vec<Cohort>>;

    /// Atomically increment member_count by 1 iff `member_count <
    /// capacity` at commit time, flipping status to Full when the
    /// increment reaches capacity.
    async fn increment_cohort_members(&self, cohort_id: &str) -> StoreResult<MembershipUpdate>;

    async fn set_cohort_status(&self, cohort_id: &str, status: CohortStatus) -> StoreResult<bool>;

    /// Reset the cohort to `member_count = 0, status = Active` and purge
    /// every participant referencing it. Implementations should apply
    /// both effects as one atomic unit where the backend permits;
    /// otherwise the brief window (orphan-free participants under an
    /// Active cohort with a stale count) is an accepted inconsistency.
    async fn reset_cohort(&self, cohort_id: &str) -> StoreResult<bool>;

    // ── participants ─────────────────────────────────────────

    /// Insert or overwrite the participant keyed by `user_id`.
    async fn upsert_participant(&self, participant: Participant) -> StoreResult<()>;

    async fn find_participant(&self, user_id: i64) -> StoreResult<Option<Participant>>;

    async fn participants_for_cohort(&self, cohort_id: &str) -> StoreResult<Vec<Participant>>;

    // ── users ────────────────────────────────────────────────

    /// Idempotent: returns false when the user already existed.
    async fn register_user(&self, user_id: i64) -> StoreResult<bool>;

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<UserRecord>>;

    async fn set_user_subscribed(&self, user_id: i64, subscribed: bool) -> StoreResult<bool>;

    async fn all_user_ids(&self) -> StoreResult<Vec<i64>>;

    async fn count_users(&self) -> StoreResult<u64>;
}
