use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use audit_log::event::LogEvent;
use audit_log::sinks::kafka::BrokerError;
use audit_log::sinks::postgres::StoreError;
use audit_log::sinks::{AuditStore, BrokerSink, StoreTransaction};

/// In-memory audit store. Persisted rows stage inside the transaction
/// and only land in `committed` on commit, mirroring the real store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<Vec<LogEvent>>>,
    transactions_begun: Arc<AtomicUsize>,
    fail_persist_at: Arc<Mutex<Option<usize>>>,
}

impl MemoryStore {
    pub fn committed(&self) -> Vec<LogEvent> {
        self.committed.lock().unwrap().clone()
    }

    pub fn transactions_begun(&self) -> usize {
        self.transactions_begun.load(Ordering::SeqCst)
    }

    /// Makes the next transaction fail at its n-th persist (1-based).
    /// One-shot: the injection clears once it fires.
    pub fn fail_persist_at(&self, n: usize) {
        *self.fail_persist_at.lock().unwrap() = Some(n);
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.transactions_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            staged: Vec::new(),
            store: self.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    staged: Vec<LogEvent>,
    store: MemoryStore,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn persist(&mut self, event: &LogEvent) -> Result<(), StoreError> {
        let index = self.staged.len() + 1;
        {
            let mut fail_at = self.store.fail_persist_at.lock().unwrap();
            if *fail_at == Some(index) {
                *fail_at = None;
                return Err(StoreError::QueryError {
                    command: "INSERT".to_owned(),
                    error: sqlx::Error::PoolClosed,
                });
            }
        }

        self.staged.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { staged, store } = *self;
        store.committed.lock().unwrap().extend(staged);
        Ok(())
    }
}

/// In-memory broker. Records acknowledged publishes in order.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    published: Arc<Mutex<Vec<LogEvent>>>,
    fail_publish_at: Arc<Mutex<Option<usize>>>,
    publish_calls: Arc<AtomicUsize>,
    flushed: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn published(&self) -> Vec<LogEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Makes the n-th publish call from now fail (1-based). One-shot.
    pub fn fail_publish_at(&self, n: usize) {
        self.publish_calls.store(0, Ordering::SeqCst);
        *self.fail_publish_at.lock().unwrap() = Some(n);
    }

    pub fn was_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerSink for MemoryBroker {
    async fn publish(&self, event: &LogEvent) -> Result<(), BrokerError> {
        let call = self.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut fail_at = self.fail_publish_at.lock().unwrap();
            if *fail_at == Some(call) {
                *fail_at = None;
                return Err(BrokerError::ProduceCanceled);
            }
        }

        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), BrokerError> {
        self.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
