use thiserror::Error;

use crate::encoder::EncodeError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Crate-wide error taxonomy.
///
/// Per-recipient broadcast failures are deliberately *not* represented
/// here. They are classified data (`broadcast::DeliveryStatus`), never
/// errors that abort a batch.
#[derive(Debug, Error)]
pub enum RoundupError {
    /// Malformed command arguments or submission input. User-correctable,
    /// zero state mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown cohort or participant id. Surfaced, not retried.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The atomic membership increment lost the race: the cohort filled
    /// between selection and confirmation.
    #[error("cohort {cohort_id} just filled")]
    CapacityConflict { cohort_id: String },

    /// Store or transport unavailable. The whole multi-step operation is
    /// aborted and is safe to retry from the beginning.
    #[error("external service error: {0}")]
    ExternalService(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("contact encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

pub type Result<T> = std::result::Result<T, RoundupError>;

impl RoundupError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RoundupError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether re-running the same command from the beginning is safe and
    /// potentially useful.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RoundupError::ExternalService(_) | RoundupError::Store(_) | RoundupError::Transport(_)
        )
    }
}
