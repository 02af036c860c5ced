use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use health::HealthHandle;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, instrument, warn};

use crate::buffer::EventBuffer;
use crate::event::LogEvent;
use crate::payload::{normalize, PayloadError};
use crate::scheduler::FlushScheduler;
use crate::sinks::kafka::BrokerError;
use crate::sinks::postgres::StoreError;
use crate::sinks::{AuditStore, BrokerSink};

/// Why a flush dropped its batch.
#[derive(Error, Debug)]
pub enum FlushError {
    #[error("store failed during flush: {0}")]
    Store(#[from] StoreError),
    #[error("broker failed during flush: {0}")]
    Broker(#[from] BrokerError),
    #[error("event details no longer serializable: {0}")]
    Payload(#[from] PayloadError),
}

impl FlushError {
    fn sink(&self) -> &'static str {
        match self {
            FlushError::Store(_) => "store",
            FlushError::Broker(_) => "broker",
            FlushError::Payload(_) => "payload",
        }
    }
}

/// The audit pipeline: producers submit events into a shared buffer,
/// flushes drain it into the durable store and the broker.
///
/// Constructed once at process start and shared by Arc; all state lives
/// here, there are no globals. Delivery is at most once: a batch that
/// fails to commit or publish is dropped, and the pairing between
/// "stored" and "published" is not atomic across the two sinks.
pub struct EventPipeline {
    buffer: EventBuffer,
    store: Arc<dyn AuditStore + Send + Sync>,
    broker: Arc<dyn BrokerSink + Send + Sync>,
    scheduler: FlushScheduler,
}

impl EventPipeline {
    pub fn new(
        batch_size: NonZeroUsize,
        store: Arc<dyn AuditStore + Send + Sync>,
        broker: Arc<dyn BrokerSink + Send + Sync>,
    ) -> EventPipeline {
        EventPipeline {
            buffer: EventBuffer::new(batch_size),
            store,
            broker,
            scheduler: FlushScheduler::new(),
        }
    }

    /// Normalizes and stamps one event, then appends it to the buffer.
    /// The append that crosses the batch size threshold runs one flush
    /// synchronously in the caller's path. Producers only ever observe
    /// payload errors here; sink failures are handled and logged by the
    /// flush path.
    #[instrument(skip_all, fields(topic = topic, action = action))]
    pub async fn submit<T: Serialize>(
        &self,
        topic: &str,
        action: &str,
        details: &T,
        user_id: Option<i64>,
    ) -> Result<(), PayloadError> {
        let details = normalize(details)?;
        let event = LogEvent {
            topic: topic.to_owned(),
            action: action.to_owned(),
            details,
            user_id,
            timestamp: Utc::now(),
        };

        counter!("audit_log_events_submitted_total").increment(1);
        if self.buffer.append(event) {
            if let Err(err) = self.flush().await {
                warn!(error = %err, "threshold flush failed");
            }
        }

        Ok(())
    }

    /// Drains the buffer and commits the batch: one store transaction
    /// for the whole batch, one broker publish per event, in submission
    /// order. The transaction commits only after every event in the
    /// batch is persisted and published. On any failure the transaction
    /// is aborted and the drained batch is dropped, not re-queued.
    #[instrument(skip_all)]
    pub async fn flush(&self) -> Result<(), FlushError> {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        match self.flush_batch(&batch).await {
            Ok(()) => {
                histogram!("audit_log_flush_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                counter!("audit_log_events_flushed_total").increment(batch.len() as u64);
                counter!("audit_log_batches_flushed_total").increment(1);
                Ok(())
            }
            Err(err) => {
                counter!("audit_log_batches_dropped_total", "sink" => err.sink()).increment(1);
                error!(
                    batch_size = batch.len(),
                    sink = err.sink(),
                    error = %err,
                    "flush failed, dropping batch"
                );
                Err(err)
            }
        }
    }

    async fn flush_batch(&self, batch: &[LogEvent]) -> Result<(), FlushError> {
        let mut tx = self.store.begin().await?;

        for event in batch {
            // Normalization is idempotent, so this is a no-op for events
            // that came in through submit.
            let details = normalize(&event.details)?;
            let event = LogEvent {
                details,
                ..event.clone()
            };

            tx.persist(&event).await?;
            self.broker.publish(&event).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Starts the background interval trigger. Idempotent: only the
    /// first call starts a loop, later calls return false and change
    /// nothing.
    pub fn arm_scheduler(
        self: &Arc<Self>,
        interval: Duration,
        liveness: HealthHandle,
    ) -> bool {
        self.scheduler.arm(Arc::clone(self), interval, liveness)
    }

    /// Stops the interval loop at its next sleep boundary, flushes
    /// whatever is still buffered, then drains the broker queue. Errors
    /// are logged and do not abort the shutdown.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        if let Err(err) = self.flush().await {
            error!(error = %err, "final flush failed during shutdown");
        }
        if let Err(err) = self.broker.flush() {
            error!(error = %err, "failed to drain the broker queue during shutdown");
        }
    }
}
