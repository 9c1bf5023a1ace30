// VCF Roundup - crowdsourced contact collection and distribution
// This exposes the core components for testing and integration

pub mod approval;
pub mod broadcast;
pub mod cohorts;
pub mod config;
pub mod encoder;
pub mod error;
pub mod health;
pub mod ops;
pub mod router;
pub mod store;
pub mod submission;
pub mod telemetry;
pub mod transport;

// Re-export key types for easy access
pub use approval::{ApprovalOutcome, ApprovalProcessor};
pub use broadcast::{
    BroadcastCounts, BroadcastReport, Broadcaster, CancelFlag, DeliveryStatus, LogProgressSink,
    ProgressSink,
};
pub use cohorts::{cohort_id_for_tier, Cohort, CohortManager, CohortStatus, Participant};
pub use config::{config, init_config, RoundupConfig};
pub use encoder::{ContactEncoder, EncodeError, VcfEncoder};
pub use error::{Result, RoundupError};
pub use health::serve_health;
pub use ops::{OpsPanel, StatsPage};
pub use router::{Button, Inbound, Reply, Router};
pub use store::{ContactStore, MemoryStore, MembershipUpdate, StoreError};
pub use submission::{SubmissionPhase, SubmissionStep, SubmissionWorkflow};
pub use telemetry::{create_cohort_span, generate_correlation_id, init_telemetry};
pub use transport::{
    ArtifactLocator, ChatTransport, ContactArtifact, Link, OutboundMessage, SendOutcome,
    TransportError,
};
