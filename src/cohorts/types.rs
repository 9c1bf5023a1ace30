use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derive the deterministic cohort id for a capacity tier.
/// Format retained from the legacy deployment so old download captions
/// and operator muscle memory keep working.
pub fn cohort_id_for_tier(tier: u32) -> String {
    format!("ID-XP{tier}GROUP")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortStatus {
    Active,
    Full,
    Approved,
}

impl std::fmt::Display for CohortStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CohortStatus::Active => write!(f, "Active"),
            CohortStatus::Full => write!(f, "Full"),
            CohortStatus::Approved => write!(f, "Approved"),
        }
    }
}

/// A fixed-capacity group of participants awaiting operator approval.
///
/// Invariants: `member_count <= capacity` always; `status == Full` iff
/// the count reached capacity and the cohort is not yet approved. At
/// most one cohort per tier exists with status != Approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub id: String,
    pub capacity: u32,
    pub member_count: u32,
    pub status: CohortStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cohort {
    pub fn new(tier: u32) -> Self {
        let now = Utc::now();
        Self {
            id: cohort_id_for_tier(tier),
            capacity: tier,
            member_count: 0,
            status: CohortStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.member_count >= self.capacity
    }

    /// The capacity tier this cohort belongs to.
    pub fn tier(&self) -> u32 {
        self.capacity
    }
}

/// A confirmed name+phone submission bound to one cohort.
/// Keyed by user id: one active submission per user, a new confirmed
/// submission overwrites the prior one regardless of cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: i64,
    pub display_name: String,
    pub phone_number: String,
    pub cohort_id: String,
    pub submitted_at: DateTime<Utc>,
}

/// A registered end user. Created on first contact, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub subscribed: bool,
    pub registered_at: DateTime<Utc>,
}
