use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::report_scan;
use super::scanner::ReconciliationScanner;
use super::scheduler::RescanScheduler;
use super::status::{StreamState, SyncStatus};
use super::stream::{SettlementStreamConsumer, StreamExit};
use crate::adapters::LedgerClient;
use crate::config::SyncConfig;
use crate::error::AppResult;
use crate::messages::RecordStore;

/// Orders the two settlement paths: scan first, then listen.
///
/// Scanning before subscribing closes the gap of settlements that happened
/// while nothing was listening. The same holds after every reconnect, so the
/// scan is repeated before each new subscription.
pub struct SyncCoordinator {
    scanner: Arc<ReconciliationScanner>,
    consumer: SettlementStreamConsumer,
    config: SyncConfig,
    status: Arc<SyncStatus>,
}

impl SyncCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn RecordStore>,
        config: SyncConfig,
        status: Arc<SyncStatus>,
    ) -> Self {
        let scanner = Arc::new(ReconciliationScanner::new(
            ledger.clone(),
            store.clone(),
            config.call_timeout,
        ));
        let consumer = SettlementStreamConsumer::new(ledger, store, config.call_timeout, status.clone());

        Self {
            scanner,
            consumer,
            config,
            status,
        }
    }

    /// Run in the background until cancelled or the stream gives up
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<AppResult<()>> {
        tokio::spawn(async move { self.start(cancel).await })
    }

    /// Blocks until `cancel` fires, or until the stream ends or fails with
    /// reconnects disabled.
    pub async fn start(&self, cancel: CancellationToken) -> AppResult<()> {
        info!("🚀 Starting settlement sync");

        let scheduler_cancel = cancel.child_token();
        let scheduler = if self.config.rescan_interval.is_zero() {
            None
        } else {
            let scheduler = RescanScheduler::new(
                self.scanner.clone(),
                self.config.rescan_interval,
                self.status.clone(),
            );
            Some(scheduler.start(scheduler_cancel.clone()))
        };

        let result = self.sync_loop(&cancel).await;

        scheduler_cancel.cancel();
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                warn!("Rescan scheduler task failed: {}", e);
            }
        }

        self.status.set_stream_state(StreamState::Stopped);
        match &result {
            Ok(()) => info!("Settlement sync stopped"),
            Err(e) => error!("❌ Settlement sync stopped: {}", e),
        }
        result
    }

    async fn sync_loop(&self, cancel: &CancellationToken) -> AppResult<()> {
        let mut attempt: u32 = 0;

        loop {
            // A pass may stop between any two writes
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Reconciliation interrupted by shutdown");
                    return Ok(());
                }
                outcome = self.scanner.run_once() => outcome,
            };
            report_scan(&self.status, &outcome);

            let session_started = Instant::now();
            match self.consumer.run(cancel).await {
                Ok(StreamExit::Cancelled) => return Ok(()),
                Ok(StreamExit::Drained) => {
                    warn!("Invoice subscription closed by the node");
                    if !self.config.stream_reconnect {
                        return Ok(());
                    }
                }
                Err(e) => {
                    if !self.config.stream_reconnect {
                        return Err(e);
                    }
                    warn!("Invoice subscription lost: {}", e);
                }
            }

            // A session that stayed up for a while starts the backoff over
            if session_started.elapsed() >= self.config.reconnect_backoff_max {
                attempt = 0;
            }
            let delay = backoff_delay(
                attempt,
                self.config.reconnect_backoff_initial,
                self.config.reconnect_backoff_max,
            );
            attempt = attempt.saturating_add(1);

            self.status.set_stream_state(StreamState::Backoff);
            self.status.record_reconnect();
            info!("🔁 Reconnecting to invoice subscription in {:?}", delay);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Capped exponential backoff with jitter over the upper half
fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponential = initial.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let capped = exponential.min(max);
    let floor = capped / 2;
    let spread = (capped - floor).as_millis() as u64;
    let jitter = rand::rng().random_range(0..=spread);
    floor + Duration::from_millis(jitter)
}
