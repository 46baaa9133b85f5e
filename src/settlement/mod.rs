// Settlement sync between the Lightning node and the message store
//
// Two independent writers keep `messages.settled` current:
// - ReconciliationScanner: full pass over unsettled records (startup,
//   every reconnect, and optionally on a timer)
// - SettlementStreamConsumer: live invoice subscription
//
// They share no lock. Both only ever write `settled = true` through the
// store's guarded update, so any interleaving converges.
pub mod coordinator;
pub mod scanner;
pub mod scheduler;
pub mod status;
pub mod stream;

pub use coordinator::SyncCoordinator;
pub use status::{StreamState, SyncSnapshot, SyncStatus};

use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use scanner::ScanReport;

/// Run one remote call under a deadline
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(operation.to_string())),
    }
}

/// Log a scan outcome and publish it to the shared status
pub(crate) fn report_scan(status: &SyncStatus, outcome: &AppResult<ScanReport>) {
    match outcome {
        Ok(report) => {
            if let Some(e) = &report.last_error {
                warn!(
                    "⚠️ Reconciliation finished with {} failed record(s), last error: {}",
                    report.failed, e
                );
            }
            info!(
                "✓ Reconciliation pass: {} scanned, {} updated, {} not found, {} undecodable",
                report.scanned, report.updated, report.not_found, report.undecodable
            );
        }
        Err(e) => error!("❌ Reconciliation pass aborted: {}", e),
    }
    status.record_scan(outcome);
}
