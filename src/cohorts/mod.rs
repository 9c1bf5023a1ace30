pub mod manager;
pub mod types;

pub use manager::CohortManager;
pub use types::{cohort_id_for_tier, Cohort, CohortStatus, Participant, UserRecord};
