use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapters::traits::InvoiceSummary;
use crate::settlement::SyncSnapshot;

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub ledger: String,
    pub sync: SyncSnapshot,
}

/// Node identity, used by clients to open channels to us
#[derive(Debug, Serialize)]
pub struct PubkeyResponse {
    pub pubkey: String,
    pub alias: String,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub memo: String,
    pub invoice: String,
    pub payment_hash: Option<String>,
    pub value_sat: i64,
    pub settled: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<InvoiceSummary> for InvoiceResponse {
    fn from(summary: InvoiceSummary) -> Self {
        Self {
            memo: summary.memo,
            invoice: summary.payment_request,
            payment_hash: summary.payment_hash,
            value_sat: summary.value_sat,
            settled: summary.settled,
            created_at: summary.created_at,
        }
    }
}
