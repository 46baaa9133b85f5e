use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat message paid for by a Lightning invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: Uuid,
    /// BOLT11 payment request; not unique in the store
    #[sqlx(rename = "invoice")]
    #[serde(rename = "invoice")]
    pub payment_request: String,
    pub settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
impl MessageRecord {
    pub fn unsettled(payment_request: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_request: payment_request.into(),
            settled: false,
            settled_at: None,
            created_at: Utc::now(),
        }
    }
}
