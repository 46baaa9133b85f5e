// Periodic re-scan
//
// The live subscription is the primary settlement path. This timer only
// narrows the window for settlements the stream missed while it was
// connected but unhealthy. It is off unless SYNC_RESCAN_INTERVAL_SECS > 0.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::report_scan;
use super::scanner::ReconciliationScanner;
use super::status::SyncStatus;

pub struct RescanScheduler {
    scanner: Arc<ReconciliationScanner>,
    period: Duration,
    status: Arc<SyncStatus>,
}

impl RescanScheduler {
    pub fn new(scanner: Arc<ReconciliationScanner>, period: Duration, status: Arc<SyncStatus>) -> Self {
        Self {
            scanner,
            period,
            status,
        }
    }

    /// Start the scheduler in the background; it stops when `cancel` fires.
    ///
    /// The first pass runs one full period after start.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let scanner = self.scanner.clone();
        let status = self.status.clone();
        let period = self.period;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("⏰ Periodic reconciliation every {:?}", period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                info!("🔄 Starting periodic reconciliation");
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    outcome = scanner.run_once() => outcome,
                };
                report_scan(&status, &outcome);
            }

            info!("Periodic reconciliation stopped");
        })
    }
}
