//! Event consumer: availability-change stream → synchronizer → ack.
//!
//! One consumer task per service. Each loop iteration:
//! 1. Reads new deliveries from the consumer group (blocking read)
//! 2. Decodes each payload into an [`AvailabilityChangeEvent`](crate::stream::AvailabilityChangeEvent)
//! 3. Applies it through [`StockSynchronizer::apply`]
//! 4. Acknowledges only after a successful apply
//!
//! # Failure Handling
//!
//! | Failure | Ack | Effect |
//! |---------|-----|--------|
//! | Undecodable payload | No | Logged; stays pending until an operator trims it |
//! | Apply fails (cache down) | No | Retried by the next pending replay |
//! | Ack fails | n/a | Redelivered later; re-apply is harmless |
//!
//! Pending deliveries are replayed once at start-up and then every
//! `pending_retry_interval`.
//!
//! # Graceful Shutdown
//!
//! The shutdown signal is checked between batches and raced against the
//! blocking read. A batch that was already fetched is always processed to
//! completion before the task exits.

use crate::authority::AuthorityClient;
use crate::cache::AvailabilityCache;
use crate::config::ConsumerConfig;
use crate::metrics;
use crate::resilience::ErrorBackoff;
use crate::stream::{decode_event, Delivery, DeliverySource};
use crate::synchronizer::StockSynchronizer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Result of handling one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Applied and acknowledged.
    Applied,
    /// Payload could not be decoded; left unacknowledged.
    Dropped,
    /// Apply failed; left unacknowledged for redelivery.
    Failed,
    /// Applied, but the acknowledgement failed.
    AckFailed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Dropped => "dropped",
            Self::Failed => "failed",
            Self::AckFailed => "ack_failed",
        }
    }
}

/// Per-batch tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub applied: usize,
    pub dropped: usize,
    pub failed: usize,
    pub ack_failed: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: DeliveryOutcome) {
        self.total += 1;
        match outcome {
            DeliveryOutcome::Applied => self.applied += 1,
            DeliveryOutcome::Dropped => self.dropped += 1,
            DeliveryOutcome::Failed => self.failed += 1,
            DeliveryOutcome::AckFailed => self.ack_failed += 1,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.applied == self.total
    }
}

/// Decode, apply and acknowledge a single delivery.
pub async fn process_delivery<C, A, D>(
    delivery: &Delivery,
    synchronizer: &StockSynchronizer<C, A>,
    source: &D,
) -> DeliveryOutcome
where
    C: AvailabilityCache,
    A: AuthorityClient,
    D: DeliverySource + ?Sized,
{
    let outcome = match decode_event(&delivery.payload) {
        Err(e) => {
            warn!(
                stream_id = %delivery.stream_id,
                error = %e,
                "Undecodable availability event, leaving unacknowledged"
            );
            DeliveryOutcome::Dropped
        }
        Ok(event) => match synchronizer.apply(&event).await {
            Err(e) => {
                error!(
                    stream_id = %delivery.stream_id,
                    product_id = %event.product_id,
                    error = %e,
                    "Failed to apply availability event, will retry"
                );
                DeliveryOutcome::Failed
            }
            Ok(()) => match source.ack(&delivery.stream_id).await {
                Ok(()) => {
                    trace!(stream_id = %delivery.stream_id, product_id = %event.product_id, "Event applied and acknowledged");
                    DeliveryOutcome::Applied
                }
                Err(e) => {
                    warn!(
                        stream_id = %delivery.stream_id,
                        error = %e,
                        "Ack failed after apply, event will be redelivered"
                    );
                    DeliveryOutcome::AckFailed
                }
            },
        },
    };

    metrics::record_event(outcome.as_str());
    outcome
}

/// Process a fetched batch in stream order.
pub async fn process_batch<C, A, D>(
    deliveries: &[Delivery],
    synchronizer: &StockSynchronizer<C, A>,
    source: &D,
) -> BatchSummary
where
    C: AvailabilityCache,
    A: AuthorityClient,
    D: DeliverySource + ?Sized,
{
    let mut summary = BatchSummary::default();
    for delivery in deliveries {
        summary.record(process_delivery(delivery, synchronizer, source).await);
    }
    summary
}

/// Replay this consumer's pending deliveries once, oldest first.
///
/// The cursor only moves forward, so entries that fail again are left for
/// the next replay instead of looping forever.
pub async fn replay_pending<C, A, D>(
    synchronizer: &StockSynchronizer<C, A>,
    source: &D,
) -> crate::error::Result<BatchSummary>
where
    C: AvailabilityCache,
    A: AuthorityClient,
    D: DeliverySource + ?Sized,
{
    let mut total = BatchSummary::default();
    let mut cursor = "0".to_string();

    loop {
        let deliveries = source.fetch_pending(&cursor).await?;
        let Some(last) = deliveries.last() else {
            break;
        };
        cursor = last.stream_id.clone();
        metrics::record_events_read("pending", deliveries.len());

        let summary = process_batch(&deliveries, synchronizer, source).await;
        total.total += summary.total;
        total.applied += summary.applied;
        total.dropped += summary.dropped;
        total.failed += summary.failed;
        total.ack_failed += summary.ack_failed;
    }

    if total.total > 0 {
        info!(
            total = total.total,
            applied = total.applied,
            dropped = total.dropped,
            failed = total.failed,
            "Pending replay complete"
        );
    }
    Ok(total)
}

/// Run the event consumer until shutdown is signaled.
///
/// `running` is set while the loop is alive, for health reporting.
pub async fn run_consumer<C, A, D>(
    synchronizer: StockSynchronizer<C, A>,
    source: Arc<D>,
    config: ConsumerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
) where
    C: AvailabilityCache,
    A: AuthorityClient,
    D: DeliverySource,
{
    let span = info_span!("event_consumer", stream = %config.stream_key, group = %config.group);

    async move {
        info!(consumer = %config.consumer_name, "Starting event consumer");
        running.store(true, Ordering::Release);

        let pending_interval = config.pending_retry_duration();
        let mut backoff = ErrorBackoff::new(Duration::from_millis(500), Duration::from_secs(30));
        // Forces a replay on the first iteration.
        let mut last_replay: Option<Instant> = None;

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received");
                break;
            }

            if last_replay.map_or(true, |at| at.elapsed() >= pending_interval) {
                match replay_pending(&synchronizer, source.as_ref()).await {
                    Ok(_) => last_replay = Some(Instant::now()),
                    Err(e) => {
                        warn!(error = %e, "Pending replay failed");
                        if !wait_or_shutdown(&mut shutdown_rx, backoff.next_delay()).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let fetched = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    // A dropped sender means the owning service is gone.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received during read");
                        break;
                    }
                    continue;
                }

                result = source.fetch_new() => result,
            };

            match fetched {
                Ok(deliveries) if deliveries.is_empty() => {
                    backoff.reset();
                    trace!("No new deliveries");
                }
                Ok(deliveries) => {
                    backoff.reset();
                    metrics::record_events_read("new", deliveries.len());
                    // Fetched work is finished even if shutdown arrives meanwhile.
                    let summary = process_batch(&deliveries, &synchronizer, source.as_ref()).await;
                    log_batch_summary(&summary);
                }
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next_delay();
                    metrics::record_error("consumer", e.kind());
                    warn!(
                        error = %e,
                        consecutive_errors = backoff.consecutive_errors(),
                        delay_ms = delay.as_millis(),
                        "Stream read failed, backing off"
                    );
                    if !wait_or_shutdown(&mut shutdown_rx, delay).await {
                        break;
                    }
                }
                Err(e) => {
                    metrics::record_error("consumer", e.kind());
                    error!(error = %e, "Non-retryable stream error, stopping consumer");
                    break;
                }
            }
        }

        running.store(false, Ordering::Release);
        info!("Event consumer stopped");
    }
    .instrument(span)
    .await
}

/// Sleep for `delay` unless shutdown arrives first. Returns `false` on shutdown.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

fn log_batch_summary(summary: &BatchSummary) {
    if summary.total == 0 {
        return;
    }

    if summary.is_clean() {
        debug!(total = summary.total, "Batch applied");
    } else {
        warn!(
            total = summary.total,
            applied = summary.applied,
            dropped = summary.dropped,
            failed = summary.failed,
            ack_failed = summary.ack_failed,
            "Batch had unacknowledged events"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(DeliveryOutcome::Applied.as_str(), "applied");
        assert_eq!(DeliveryOutcome::Dropped.as_str(), "dropped");
        assert_eq!(DeliveryOutcome::Failed.as_str(), "failed");
        assert_eq!(DeliveryOutcome::AckFailed.as_str(), "ack_failed");
    }

    #[test]
    fn test_batch_summary_tally() {
        let mut summary = BatchSummary::default();
        summary.record(DeliveryOutcome::Applied);
        summary.record(DeliveryOutcome::Applied);
        assert!(summary.is_clean());

        summary.record(DeliveryOutcome::Dropped);
        summary.record(DeliveryOutcome::Failed);
        summary.record(DeliveryOutcome::AckFailed);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ack_failed, 1);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_empty_summary_is_clean() {
        assert!(BatchSummary::default().is_clean());
        log_batch_summary(&BatchSummary::default());
    }

    #[tokio::test]
    async fn test_wait_or_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(wait_or_shutdown(&mut rx, Duration::from_millis(5)).await);

        tx.send(true).unwrap();
        assert!(!wait_or_shutdown(&mut rx, Duration::from_secs(60)).await);
    }
}
