use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bounded;
use super::status::{StreamState, SyncStatus};
use crate::adapters::{InvoiceEvent, LedgerClient};
use crate::error::AppResult;
use crate::messages::RecordStore;

/// Why a subscription session ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamExit {
    /// The node closed the subscription
    Drained,
    Cancelled,
}

/// Applies settlements from the node's live invoice subscription.
///
/// Events are handled one at a time in arrival order: an event's store
/// writes finish before the next event is read.
pub struct SettlementStreamConsumer {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn RecordStore>,
    call_timeout: Duration,
    status: Arc<SyncStatus>,
}

impl SettlementStreamConsumer {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn RecordStore>,
        call_timeout: Duration,
        status: Arc<SyncStatus>,
    ) -> Self {
        Self {
            ledger,
            store,
            call_timeout,
            status,
        }
    }

    /// Run one subscription session.
    ///
    /// Returns an error when subscribing or receiving fails; no retry happens
    /// here.
    pub async fn run(&self, cancel: &CancellationToken) -> AppResult<StreamExit> {
        self.status.set_stream_state(StreamState::Connecting);

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamExit::Cancelled),
            subscribed = bounded(
                self.call_timeout,
                "subscribe_settlements",
                self.ledger.subscribe_settlements(),
            ) => subscribed,
        };
        let mut stream = subscribed?;

        self.status.set_stream_state(StreamState::Listening);
        info!("👂 Listening for invoice settlements");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Invoice subscription cancelled");
                    return Ok(StreamExit::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) if event.is_settled => {
                    self.apply_settlement(&event).await;
                }
                Some(Ok(event)) => {
                    debug!("Ignoring non-settlement update for {}", event.payment_request);
                }
                Some(Err(e)) => {
                    error!("❌ Invoice subscription failed: {}", e);
                    return Err(e);
                }
                None => {
                    // Dropping the stream closes the connection
                    drop(stream);
                    info!("Invoice subscription ended by the node");
                    return Ok(StreamExit::Drained);
                }
            }
        }
    }

    /// Mark every record carrying this payment request as settled.
    ///
    /// Store failures are logged and swallowed; the next reconciliation
    /// pass picks the record up again. Returns the number of records flipped.
    pub async fn apply_settlement(&self, event: &InvoiceEvent) -> usize {
        info!(
            "⚡ Received settlement {} ({})",
            event.payment_request,
            event.payment_hash.as_deref().unwrap_or("unknown hash")
        );

        let found = bounded(
            self.call_timeout,
            "find_by_payment_request",
            self.store.find_by_payment_request(&event.payment_request),
        )
        .await;

        let records = match found {
            Ok(records) => records,
            Err(e) => {
                warn!("Couldn't look up messages for {}: {}", event.payment_request, e);
                return 0;
            }
        };

        if records.is_empty() {
            debug!("No message carries {}", event.payment_request);
            return 0;
        }
        if records.len() > 1 {
            warn!(
                "{} messages share payment request {}",
                records.len(),
                event.payment_request
            );
        }

        let mut flipped = 0;
        for record in &records {
            match bounded(self.call_timeout, "mark_settled", self.store.mark_settled(record.id)).await {
                Ok(true) => flipped += 1,
                Ok(false) => debug!("Message {} already settled", record.id),
                Err(e) => warn!("❌ Update failed for message {}: {}", record.id, e),
            }
        }

        if flipped > 0 {
            self.status.record_settlements(flipped as u64);
        }
        flipped
    }
}
