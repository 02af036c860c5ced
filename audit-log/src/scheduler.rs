use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use health::HealthHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::pipeline::EventPipeline;

/// Background interval trigger for flushes.
///
/// At most one loop runs at a time: arming is an atomic compare-and-set
/// and the loser of a race does nothing. The supervisor arms once at
/// startup; nothing re-arms opportunistically. Cancellation is
/// cooperative and observed at the sleep boundary only, so an in-flight
/// flush always completes before the loop exits.
pub struct FlushScheduler {
    running: AtomicBool,
    state: Mutex<Option<LoopState>>,
}

struct LoopState {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    /// Starts the interval loop if none is running. Returns true when
    /// this call started it, false when a loop was already armed.
    ///
    /// Flush errors are logged and the loop keeps ticking: one bad batch
    /// must not silence all future flushing. Each iteration reports to
    /// the liveness probe, so a stalled loop fails the process health
    /// check instead of going unnoticed.
    pub fn arm(
        &self,
        pipeline: Arc<EventPipeline>,
        interval: Duration,
        liveness: HealthHandle,
    ) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick resolves immediately, consume it so the
            // first flush happens one full interval after arming.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        info!("flush scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        liveness.report_healthy();
                        if let Err(err) = pipeline.flush().await {
                            error!(error = %err, "interval flush failed");
                        }
                    }
                }
            }
        });

        let mut state = self.state.lock().expect("poisoned FlushScheduler lock");
        *state = Some(LoopState { cancel, handle });
        true
    }

    pub fn is_armed(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests a cooperative stop and waits for the loop to exit. Takes
    /// effect at the next sleep boundary, never mid-flush. A later `arm`
    /// may start a fresh loop.
    pub async fn stop(&self) {
        let state = self
            .state
            .lock()
            .expect("poisoned FlushScheduler lock")
            .take();

        if let Some(LoopState { cancel, handle }) = state {
            cancel.cancel();
            if let Err(err) = handle.await {
                error!(error = %err, "flush scheduler loop panicked");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for FlushScheduler {
    fn default() -> Self {
        Self::new()
    }
}
