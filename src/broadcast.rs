// Broadcast fan-out engine: best-effort mass delivery with per-recipient
// outcome classification. A single recipient failure never halts the
// batch; failures become counts, not errors.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use tracing::{debug, info, warn};

use crate::config::BroadcastConfig;
use crate::telemetry::generate_correlation_id;
use crate::transport::{ChatTransport, OutboundMessage, SendOutcome};

/// Classified per-recipient delivery result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Blocked,
    Unreachable,
    Error,
}

impl From<&SendOutcome> for DeliveryStatus {
    fn from(outcome: &SendOutcome) -> Self {
        match outcome {
            SendOutcome::Delivered => DeliveryStatus::Success,
            SendOutcome::Blocked => DeliveryStatus::Blocked,
            SendOutcome::Unreachable => DeliveryStatus::Unreachable,
            SendOutcome::Failed(_) => DeliveryStatus::Error,
        }
    }
}

/// Cumulative per-category counts. `processed` is monotonically
/// non-decreasing across every progress emission of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastCounts {
    pub processed: usize,
    pub success: usize,
    pub blocked: usize,
    pub unreachable: usize,
    pub error: usize,
}

impl BroadcastCounts {
    fn record(&mut self, status: DeliveryStatus) {
        self.processed += 1;
        match status {
            DeliveryStatus::Success => self.success += 1,
            DeliveryStatus::Blocked => self.blocked += 1,
            DeliveryStatus::Unreachable => self.unreachable += 1,
            DeliveryStatus::Error => self.error += 1,
        }
    }
}

/// Final summary for a completed (or cancelled) run.
#[derive(Debug, Clone)]
pub struct BroadcastReport {
    pub counts: BroadcastCounts,
    pub elapsed: Duration,
    pub cancelled: bool,
}

/// Receives periodic progress updates and the final report. Emission is
/// serialized: the engine never emits two updates concurrently.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, counts: BroadcastCounts);
    async fn on_complete(&self, report: &BroadcastReport);
}

/// Sink that only logs. Handy default for operator flows that report
/// elsewhere.
pub struct LogProgressSink;

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn on_progress(&self, counts: BroadcastCounts) {
        info!(
            processed = counts.processed,
            success = counts.success,
            blocked = counts.blocked,
            unreachable = counts.unreachable,
            error = counts.error,
            "Broadcast in progress"
        );
    }

    async fn on_complete(&self, report: &BroadcastReport) {
        info!(
            processed = report.counts.processed,
            success = report.counts.success,
            blocked = report.counts.blocked,
            unreachable = report.counts.unreachable,
            error = report.counts.error,
            elapsed_secs = report.elapsed.as_secs(),
            cancelled = report.cancelled,
            "Broadcast completed"
        );
    }
}

/// Cooperative cancellation checked at each recipient boundary.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Broadcaster {
    transport: Arc<dyn ChatTransport>,
    limiter: DefaultDirectRateLimiter,
    progress_interval: usize,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn ChatTransport>, config: &BroadcastConfig) -> Self {
        let per_second = NonZeroU32::new(config.sends_per_second.max(1))
            .expect("max(1) guarantees non-zero");
        let burst =
            NonZeroU32::new(config.burst_capacity.max(1)).expect("max(1) guarantees non-zero");
        let quota = Quota::per_second(per_second).allow_burst(burst);
        Self {
            transport,
            limiter: RateLimiter::direct(quota),
            progress_interval: config.progress_interval.max(1),
        }
    }

    /// Deliver `message` to every recipient, classifying each outcome.
    /// Recipients are consumed lazily, so arbitrarily large sets never
    /// get buffered here. Cancellation is honored between recipients;
    /// everything already sent stays sent.
    pub async fn run<I>(
        &self,
        message: &OutboundMessage,
        recipients: I,
        sink: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> BroadcastReport
    where
        I: IntoIterator<Item = i64>,
    {
        let correlation_id = generate_correlation_id();
        let started = Instant::now();
        let mut counts = BroadcastCounts::default();
        let mut cancelled = false;

        info!(correlation.id = %correlation_id, "Broadcast starting");

        for recipient in recipients {
            if cancel.is_cancelled() {
                warn!(
                    correlation.id = %correlation_id,
                    processed = counts.processed,
                    "Broadcast cancelled mid-run"
                );
                cancelled = true;
                break;
            }

            self.limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
                .await;

            let outcome = self.transport.send_direct(recipient, message).await;
            let status = DeliveryStatus::from(&outcome);
            if let SendOutcome::Failed(reason) = &outcome {
                warn!(
                    correlation.id = %correlation_id,
                    recipient,
                    reason = %reason,
                    "Delivery failed"
                );
            } else {
                debug!(correlation.id = %correlation_id, recipient, ?status, "Delivery classified");
            }
            counts.record(status);

            if counts.processed % self.progress_interval == 0 {
                sink.on_progress(counts).await;
            }
        }

        let report = BroadcastReport {
            counts,
            elapsed: started.elapsed(),
            cancelled,
        };
        sink.on_complete(&report).await;
        report
    }
}
