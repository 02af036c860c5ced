use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::event::LogEvent;
use crate::sinks::kafka::BrokerError;
use crate::sinks::postgres::StoreError;

pub mod kafka;
pub mod postgres;

/// Durable half of a flush. One transaction spans one drained batch,
/// so rows only become visible on commit and aborting after a partial
/// write leaves no trace of the batch.
#[async_trait]
pub trait AuditStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// An open batch transaction. Dropping it without committing rolls the
/// batch back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn persist(&mut self, event: &LogEvent) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Broker half of a flush. Publishes one event to its recorded topic
/// and resolves once the write is acknowledged.
#[async_trait]
pub trait BrokerSink {
    async fn publish(&self, event: &LogEvent) -> Result<(), BrokerError>;

    /// Drain any internal delivery queue, called once at shutdown.
    fn flush(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Stand-in broker for local runs without Kafka: logs the event and
/// acknowledges immediately.
pub struct PrintSink {}

#[async_trait]
impl BrokerSink for PrintSink {
    async fn publish(&self, event: &LogEvent) -> Result<(), BrokerError> {
        info!("event: {:?}", event);
        counter!("audit_log_events_published_total").increment(1);

        Ok(())
    }
}
