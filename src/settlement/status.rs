use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::scanner::ScanReport;
use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Connecting,
    Listening,
    Backoff,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub finished_at: DateTime<Utc>,
    pub scanned: usize,
    pub updated: usize,
    pub not_found: usize,
    pub undecodable: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub stream_state: StreamState,
    pub last_scan: Option<ScanSummary>,
    /// Set when the most recent pass could not list records at all
    pub last_scan_error: Option<String>,
    pub settlements_applied: u64,
    pub reconnects: u64,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            stream_state: StreamState::Idle,
            last_scan: None,
            last_scan_error: None,
            settlements_applied: 0,
            reconnects: 0,
        }
    }
}

/// Shared view of the sync engine, read by the health endpoint
#[derive(Debug, Default)]
pub struct SyncStatus {
    inner: RwLock<SyncSnapshot>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.read().clone()
    }

    pub fn set_stream_state(&self, state: StreamState) {
        self.inner.write().stream_state = state;
    }

    pub fn record_scan(&self, outcome: &AppResult<ScanReport>) {
        let mut inner = self.inner.write();
        match outcome {
            Ok(report) => {
                inner.last_scan = Some(ScanSummary {
                    finished_at: Utc::now(),
                    scanned: report.scanned,
                    updated: report.updated,
                    not_found: report.not_found,
                    undecodable: report.undecodable,
                    failed: report.failed,
                    last_error: report.last_error.as_ref().map(|e| e.to_string()),
                });
                inner.last_scan_error = None;
            }
            Err(e) => inner.last_scan_error = Some(e.to_string()),
        }
    }

    pub fn record_settlements(&self, count: u64) {
        self.inner.write().settlements_applied += count;
    }

    pub fn record_reconnect(&self) {
        self.inner.write().reconnects += 1;
    }
}
