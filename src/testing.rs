// Test doubles for the ledger and the message store
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::adapters::traits::{
    InvoiceEvent, InvoiceEventStream, InvoiceState, InvoiceSummary, LedgerClient, NodeInfo,
};
use crate::error::{AppError, AppResult, LedgerError};
use crate::messages::{InMemoryMessageRepository, MessageRecord, RecordStore};

pub fn settled_event(payment_request: &str) -> InvoiceEvent {
    InvoiceEvent {
        payment_request: payment_request.to_string(),
        payment_hash: None,
        is_settled: true,
    }
}

pub fn open_event(payment_request: &str) -> InvoiceEvent {
    InvoiceEvent {
        payment_request: payment_request.to_string(),
        payment_hash: None,
        is_settled: false,
    }
}

/// One scripted subscription: the events, then either end-of-stream or
/// a connection that never yields again
pub struct ScriptedSession {
    pub events: Vec<AppResult<InvoiceEvent>>,
    pub hold_open: bool,
}

/// Scriptable in-memory Lightning node
#[derive(Default)]
pub struct MockLedger {
    decodes: Mutex<HashMap<String, String>>,
    invoices: Mutex<HashMap<String, bool>>,
    failing_lookups: Mutex<HashSet<String>>,
    lookup_delay: Mutex<Option<Duration>>,
    node_info_delay: Mutex<Option<Duration>>,
    sessions: Mutex<VecDeque<ScriptedSession>>,
    subscribe_failures: Mutex<VecDeque<String>>,
    live: Mutex<Option<mpsc::UnboundedSender<AppResult<InvoiceEvent>>>>,
    memos: Mutex<Vec<InvoiceSummary>>,
    calls: Mutex<Vec<String>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payment request that decodes to `hash`, with the node reporting `settled`
    pub fn with_invoice(self, payment_request: &str, hash: &str, settled: bool) -> Self {
        self.decodes
            .lock()
            .insert(payment_request.to_string(), hash.to_string());
        self.invoices.lock().insert(hash.to_string(), settled);
        self
    }

    /// Decodes fine but the node has no such invoice
    pub fn with_unknown_invoice(self, payment_request: &str, hash: &str) -> Self {
        self.decodes
            .lock()
            .insert(payment_request.to_string(), hash.to_string());
        self
    }

    pub fn with_failing_lookup(self, hash: &str) -> Self {
        self.failing_lookups.lock().insert(hash.to_string());
        self
    }

    pub fn with_lookup_delay(self, delay: Duration) -> Self {
        *self.lookup_delay.lock() = Some(delay);
        self
    }

    pub fn with_node_info_delay(self, delay: Duration) -> Self {
        *self.node_info_delay.lock() = Some(delay);
        self
    }

    pub fn with_session(self, events: Vec<AppResult<InvoiceEvent>>, hold_open: bool) -> Self {
        self.sessions
            .lock()
            .push_back(ScriptedSession { events, hold_open });
        self
    }

    pub fn with_subscribe_failure(self, message: &str) -> Self {
        self.subscribe_failures.lock().push_back(message.to_string());
        self
    }

    pub fn with_memo_invoice(self, summary: InvoiceSummary) -> Self {
        self.memos.lock().push(summary);
        self
    }

    pub fn settle(&self, hash: &str) {
        self.invoices.lock().insert(hash.to_string(), true);
    }

    /// Push an event into the open unscripted subscription
    pub fn push(&self, event: AppResult<InvoiceEvent>) -> bool {
        match self.live.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Close the open unscripted subscription
    pub fn end_stream(&self) {
        self.live.lock().take();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn decode_payment_request(&self, payment_request: &str) -> AppResult<String> {
        self.log(format!("decode:{}", payment_request));
        self.decodes
            .lock()
            .get(payment_request)
            .cloned()
            .ok_or_else(|| {
                LedgerError::InvalidPaymentRequest(format!("cannot decode {}", payment_request))
                    .into()
            })
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> AppResult<Option<InvoiceState>> {
        self.log(format!("lookup:{}", payment_hash));
        let delay = *self.lookup_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_lookups.lock().contains(payment_hash) {
            return Err(LedgerError::Rpc {
                status: 503,
                message: "node unavailable".to_string(),
            }
            .into());
        }
        Ok(self
            .invoices
            .lock()
            .get(payment_hash)
            .map(|settled| InvoiceState {
                payment_hash: payment_hash.to_string(),
                is_settled: *settled,
            }))
    }

    async fn subscribe_settlements(&self) -> AppResult<InvoiceEventStream> {
        self.log("subscribe".to_string());
        if let Some(message) = self.subscribe_failures.lock().pop_front() {
            return Err(LedgerError::Transport(message).into());
        }

        let scripted = self.sessions.lock().pop_front();
        match scripted {
            Some(session) => {
                let events = futures::stream::iter(session.events);
                if session.hold_open {
                    Ok(Box::pin(events.chain(futures::stream::pending())))
                } else {
                    Ok(Box::pin(events))
                }
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.live.lock() = Some(tx);
                Ok(Box::pin(UnboundedReceiverStream::new(rx)))
            }
        }
    }

    async fn node_info(&self) -> AppResult<NodeInfo> {
        let delay = *self.node_info_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(NodeInfo {
            pubkey: "02abcdef".to_string(),
            alias: "mock-node".to_string(),
        })
    }

    async fn find_invoice_by_memo(&self, memo: &str) -> AppResult<Option<InvoiceSummary>> {
        Ok(self.memos.lock().iter().find(|s| s.memo == memo).cloned())
    }
}

/// In-memory store that counts calls and can be told to fail
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: InMemoryMessageRepository,
    fail_listing: Mutex<bool>,
    fail_lookups: Mutex<bool>,
    failing_marks: Mutex<HashSet<Uuid>>,
    pub find_calls: AtomicUsize,
    pub mark_calls: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed(&self, payment_request: &str) -> MessageRecord {
        self.inner
            .insert(MessageRecord::unsettled(payment_request))
            .await
    }

    pub async fn is_settled(&self, id: Uuid) -> bool {
        self.inner.get(id).await.map(|r| r.settled).unwrap_or(false)
    }

    pub fn fail_listing(&self) {
        *self.fail_listing.lock() = true;
    }

    pub fn fail_lookups(&self) {
        *self.fail_lookups.lock() = true;
    }

    pub fn fail_mark(&self, id: Uuid) {
        self.failing_marks.lock().insert(id);
    }

    pub fn marks(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }

    fn unavailable() -> AppError {
        AppError::ExternalError("store unavailable".to_string())
    }
}

#[async_trait]
impl RecordStore for InstrumentedStore {
    async fn list_unsettled(&self) -> AppResult<Vec<MessageRecord>> {
        if *self.fail_listing.lock() {
            return Err(Self::unavailable());
        }
        self.inner.list_unsettled().await
    }

    async fn find_by_payment_request(
        &self,
        payment_request: &str,
    ) -> AppResult<Vec<MessageRecord>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_lookups.lock() {
            return Err(Self::unavailable());
        }
        self.inner.find_by_payment_request(payment_request).await
    }

    async fn mark_settled(&self, id: Uuid) -> AppResult<bool> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_marks.lock().contains(&id) {
            return Err(Self::unavailable());
        }
        self.inner.mark_settled(id).await
    }
}
