use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::MessageRecord;
use super::repository::RecordStore;
use crate::error::AppResult;

/// Process-local message store backing the test doubles
pub struct InMemoryMessageRepository {
    records: RwLock<HashMap<Uuid, MessageRecord>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, record: MessageRecord) -> MessageRecord {
        let mut records = self.records.write().await;
        records.insert(record.id, record.clone());
        record
    }

    pub async fn get(&self, id: Uuid) -> Option<MessageRecord> {
        let records = self.records.read().await;
        records.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryMessageRepository {
    async fn list_unsettled(&self) -> AppResult<Vec<MessageRecord>> {
        let records = self.records.read().await;
        let mut unsettled: Vec<MessageRecord> =
            records.values().filter(|r| !r.settled).cloned().collect();
        unsettled.sort_by_key(|r| r.created_at);
        Ok(unsettled)
    }

    async fn find_by_payment_request(
        &self,
        payment_request: &str,
    ) -> AppResult<Vec<MessageRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.payment_request == payment_request)
            .cloned()
            .collect())
    }

    async fn mark_settled(&self, id: Uuid) -> AppResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if !record.settled => {
                record.settled = true;
                record.settled_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_settled_is_idempotent() {
        let store = InMemoryMessageRepository::new();
        let record = store.insert(MessageRecord::unsettled("lnbc1first")).await;

        assert!(store.mark_settled(record.id).await.unwrap());
        let first = store.get(record.id).await.unwrap();
        assert!(first.settled);

        // Second call is a no-op and keeps the original timestamp
        assert!(!store.mark_settled(record.id).await.unwrap());
        let second = store.get(record.id).await.unwrap();
        assert!(second.settled);
        assert_eq!(first.settled_at, second.settled_at);
    }

    #[tokio::test]
    async fn test_mark_settled_unknown_record() {
        let store = InMemoryMessageRepository::new();
        assert!(!store.mark_settled(Uuid::new_v4()).await.unwrap());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_queries() {
        let store = InMemoryMessageRepository::new();
        let a = store.insert(MessageRecord::unsettled("lnbc1dup")).await;
        store.insert(MessageRecord::unsettled("lnbc1dup")).await;
        store.insert(MessageRecord::unsettled("lnbc1other")).await;

        assert_eq!(store.find_by_payment_request("lnbc1dup").await.unwrap().len(), 2);
        assert!(store.find_by_payment_request("lnbc1none").await.unwrap().is_empty());

        store.mark_settled(a.id).await.unwrap();
        let unsettled = store.list_unsettled().await.unwrap();
        assert_eq!(unsettled.len(), 2);
        assert!(unsettled.iter().all(|r| r.id != a.id));
    }
}
