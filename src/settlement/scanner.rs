use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::bounded;
use crate::adapters::LedgerClient;
use crate::error::{AppError, AppResult, LedgerError};
use crate::messages::{MessageRecord, RecordStore};

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ScanReport {
    pub scanned: usize,
    /// Successful `mark_settled` calls
    pub updated: usize,
    pub not_found: usize,
    pub undecodable: usize,
    pub failed: usize,
    pub last_error: Option<AppError>,
}

impl ScanReport {
    fn record_failure(&mut self, error: AppError) {
        self.failed += 1;
        self.last_error = Some(error);
    }
}

/// Cross-checks every unsettled message against the node
pub struct ReconciliationScanner {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn RecordStore>,
    call_timeout: Duration,
}

impl ReconciliationScanner {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn RecordStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            call_timeout,
        }
    }

    /// One full pass.
    ///
    /// Only a failure to list unsettled records fails the call; per-record
    /// problems are logged, counted, and the pass moves on.
    pub async fn run_once(&self) -> AppResult<ScanReport> {
        info!("🔍 Reconciling unsettled messages against {}", self.ledger.name());

        let records = bounded(self.call_timeout, "list_unsettled", self.store.list_unsettled()).await?;

        let mut report = ScanReport {
            scanned: records.len(),
            ..Default::default()
        };

        if records.is_empty() {
            info!("✓ No unsettled messages");
            return Ok(report);
        }

        info!("📊 Found {} unsettled messages", records.len());

        for record in &records {
            self.reconcile_record(record, &mut report).await;
        }

        Ok(report)
    }

    async fn reconcile_record(&self, record: &MessageRecord, report: &mut ScanReport) {
        let decoded = bounded(
            self.call_timeout,
            "decode_payment_request",
            self.ledger.decode_payment_request(&record.payment_request),
        )
        .await;

        let payment_hash = match decoded {
            Ok(hash) => hash,
            Err(AppError::Ledger(LedgerError::InvalidPaymentRequest(reason))) => {
                warn!("⏭️ Skipping message {}: undecodable payment request ({})", record.id, reason);
                report.undecodable += 1;
                return;
            }
            Err(e) => {
                warn!("⏭️ Failed to decode payment request of message {}: {}", record.id, e);
                report.record_failure(e);
                return;
            }
        };

        let looked_up = bounded(
            self.call_timeout,
            "lookup_invoice",
            self.ledger.lookup_invoice(&payment_hash),
        )
        .await;

        let state = match looked_up {
            Ok(Some(state)) => state,
            Ok(None) => {
                // Invoices issued by another node instance (test vs prod) are
                // never found here and stay unsettled
                warn!("Invoice {} not found on node, leaving message {} unsettled", payment_hash, record.id);
                report.not_found += 1;
                return;
            }
            Err(e) => {
                warn!("Failed to look up invoice {}: {}", payment_hash, e);
                report.record_failure(e);
                return;
            }
        };

        if !state.is_settled {
            debug!("Invoice {} still open", payment_hash);
            return;
        }

        match bounded(self.call_timeout, "mark_settled", self.store.mark_settled(record.id)).await {
            Ok(flipped) => {
                report.updated += 1;
                if flipped {
                    info!("✓ Updated {}", record.payment_request);
                } else {
                    debug!("Message {} was already settled", record.id);
                }
            }
            Err(e) => {
                warn!("❌ Update failed for message {}: {}", record.id, e);
                report.record_failure(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InstrumentedStore, MockLedger};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn scanner(ledger: Arc<MockLedger>, store: Arc<InstrumentedStore>) -> ReconciliationScanner {
        ReconciliationScanner::new(ledger, store, TIMEOUT)
    }

    #[tokio::test]
    async fn test_settled_invoice_is_reconciled() {
        let ledger = Arc::new(MockLedger::new().with_invoice("pr1", "hashA", true));
        let store = InstrumentedStore::new();
        let record = store.seed("pr1").await;

        let report = scanner(ledger, store.clone()).run_once().await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.scanned, 1);
        assert!(report.last_error.is_none());
        assert!(store.is_settled(record.id).await);
    }

    #[tokio::test]
    async fn test_open_invoices_are_never_marked() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_invoice("pr-open", "hashOpen", false)
                .with_invoice("pr-paid", "hashPaid", true),
        );
        let store = InstrumentedStore::new();
        let open = store.seed("pr-open").await;
        let paid = store.seed("pr-paid").await;

        let report = scanner(ledger, store.clone()).run_once().await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(store.marks(), 1);
        assert!(!store.is_settled(open.id).await);
        assert!(store.is_settled(paid.id).await);
    }

    #[tokio::test]
    async fn test_not_found_does_not_abort_pass() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_unknown_invoice("pr-testnet", "hashGone")
                .with_invoice("pr2", "hashB", true),
        );
        let store = InstrumentedStore::new();
        let missing = store.seed("pr-testnet").await;
        let paid = store.seed("pr2").await;

        let report = scanner(ledger, store.clone()).run_once().await.unwrap();

        assert_eq!(report.not_found, 1);
        assert_eq!(report.updated, 1);
        assert!(report.last_error.is_none());
        assert!(!store.is_settled(missing.id).await);
        assert!(store.is_settled(paid.id).await);
    }

    #[tokio::test]
    async fn test_undecodable_request_is_skipped() {
        let ledger = Arc::new(MockLedger::new().with_invoice("pr3", "hashC", true));
        let store = InstrumentedStore::new();
        let garbage = store.seed("not-a-payment-request").await;
        let paid = store.seed("pr3").await;

        let report = scanner(ledger.clone(), store.clone()).run_once().await.unwrap();

        assert_eq!(report.undecodable, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(ledger.count_calls("lookup:"), 1);
        assert!(!store.is_settled(garbage.id).await);
        assert!(store.is_settled(paid.id).await);
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let ledger = Arc::new(MockLedger::new());
        let store = InstrumentedStore::new();
        store.seed("pr1").await;
        store.fail_listing();

        let result = scanner(ledger.clone(), store).run_once().await;

        assert!(result.is_err());
        assert!(ledger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_record_failures_are_counted_and_pass_continues() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_invoice("pr-flaky", "hashFlaky", true)
                .with_failing_lookup("hashFlaky")
                .with_invoice("pr-write", "hashWrite", true)
                .with_invoice("pr-ok", "hashOk", true),
        );
        let store = InstrumentedStore::new();
        store.seed("pr-flaky").await;
        let write_fails = store.seed("pr-write").await;
        let ok = store.seed("pr-ok").await;
        store.fail_mark(write_fails.id);

        let report = scanner(ledger, store.clone()).run_once().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 2);
        assert!(report.last_error.is_some());
        assert!(store.is_settled(ok.id).await);
        assert!(!store.is_settled(write_fails.id).await);
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out_per_record() {
        let ledger = Arc::new(
            MockLedger::new()
                .with_invoice("pr-slow", "hashSlow", true)
                .with_lookup_delay(Duration::from_millis(200)),
        );
        let store = InstrumentedStore::new();
        let record = store.seed("pr-slow").await;

        let report = ReconciliationScanner::new(ledger, store.clone(), Duration::from_millis(20))
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(matches!(report.last_error, Some(AppError::Timeout(_))));
        assert!(!store.is_settled(record.id).await);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let ledger = Arc::new(MockLedger::new().with_invoice("pr1", "hashA", true));
        let store = InstrumentedStore::new();
        let record = store.seed("pr1").await;
        let scanner = scanner(ledger, store.clone());

        assert_eq!(scanner.run_once().await.unwrap().updated, 1);
        let second = scanner.run_once().await.unwrap();

        assert_eq!(second.scanned, 0);
        assert_eq!(second.updated, 0);
        assert!(store.is_settled(record.id).await);
    }
}
