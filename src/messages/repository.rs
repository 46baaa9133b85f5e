use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::models::MessageRecord;
use crate::error::AppResult;

/// The document store's side of settlement sync
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records the store still believes are unpaid
    async fn list_unsettled(&self) -> AppResult<Vec<MessageRecord>>;

    /// Records carrying this payment request (usually zero or one)
    async fn find_by_payment_request(&self, payment_request: &str)
        -> AppResult<Vec<MessageRecord>>;

    /// Flip `settled` to true.
    ///
    /// Returns `true` when this call performed the flip and `false` when the
    /// record was already settled or no longer exists. Neither case is an
    /// error, so concurrent writers can call this freely.
    async fn mark_settled(&self, id: Uuid) -> AppResult<bool>;
}

/// Postgres-backed message store
pub struct PgMessageRepository {
    pub pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgMessageRepository {
    async fn list_unsettled(&self) -> AppResult<Vec<MessageRecord>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, invoice, settled, settled_at, created_at
            FROM messages
            WHERE settled = FALSE
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn find_by_payment_request(
        &self,
        payment_request: &str,
    ) -> AppResult<Vec<MessageRecord>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, invoice, settled, settled_at, created_at
            FROM messages
            WHERE invoice = $1
            "#,
        )
        .bind(payment_request)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn mark_settled(&self, id: Uuid) -> AppResult<bool> {
        // Guarded on settled = FALSE so settled_at keeps the first settlement time
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET settled = TRUE, settled_at = NOW()
            WHERE id = $1 AND settled = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        let flipped = result.rows_affected() > 0;
        if !flipped {
            debug!("Message {} already settled", id);
        }

        Ok(flipped)
    }
}
