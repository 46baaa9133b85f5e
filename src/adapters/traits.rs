use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::AppResult;

/// Settlement state of one invoice as currently known to the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceState {
    pub payment_hash: String,
    pub is_settled: bool,
}

/// One item of the node's invoice subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceEvent {
    pub payment_request: String,
    /// Hex payment hash, when the node sent one
    pub payment_hash: Option<String>,
    pub is_settled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub pubkey: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub memo: String,
    pub payment_request: String,
    pub payment_hash: Option<String>,
    pub value_sat: i64,
    pub settled: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Live invoice updates; ends when the node closes the subscription
pub type InvoiceEventStream = Pin<Box<dyn Stream<Item = AppResult<InvoiceEvent>> + Send>>;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode a BOLT11 payment request into its hex payment hash
    async fn decode_payment_request(&self, payment_request: &str) -> AppResult<String>;

    /// `Ok(None)` when the node has never seen this invoice
    async fn lookup_invoice(&self, payment_hash: &str) -> AppResult<Option<InvoiceState>>;

    /// Open the live invoice subscription.
    ///
    /// The stream carries every lifecycle update, not only settlements.
    async fn subscribe_settlements(&self) -> AppResult<InvoiceEventStream>;

    async fn node_info(&self) -> AppResult<NodeInfo>;

    /// Most recent invoice carrying this memo
    async fn find_invoice_by_memo(&self, memo: &str) -> AppResult<Option<InvoiceSummary>>;
}
