use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize tracing with JSON output for structured logging.
/// Correlation ids link the steps of a single approval or broadcast run.
pub fn init_telemetry(default_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(filter)
        .init();

    tracing::info!("VCF Roundup telemetry initialized with structured logging");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a span with common cohort coordination attributes
pub fn create_cohort_span(
    operation: &str,
    cohort_id: Option<&str>,
    user_id: Option<i64>,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "cohort_coordination",
        operation = operation,
        cohort.id = cohort_id,
        user.id = user_id,
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}
