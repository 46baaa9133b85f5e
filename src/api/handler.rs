use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::models::*;
use crate::{
    adapters::LedgerClient,
    error::{AppError, AppResult},
    settlement::{StreamState, SyncStatus},
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn LedgerClient>,
    pub sync_status: Arc<SyncStatus>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let sync = state.sync_status.snapshot();

    let degraded = matches!(sync.stream_state, StreamState::Backoff | StreamState::Stopped)
        || sync.last_scan_error.is_some();

    Ok(Json(HealthResponse {
        status: if degraded {
            "degraded".to_string()
        } else {
            "healthy".to_string()
        },
        timestamp: Utc::now(),
        ledger: state.ledger.name().to_string(),
        sync,
    }))
}

/// GET /pubkey
pub async fn get_pubkey(State(state): State<AppState>) -> AppResult<Json<PubkeyResponse>> {
    let info = state.ledger.node_info().await?;

    Ok(Json(PubkeyResponse {
        pubkey: info.pubkey,
        alias: info.alias,
    }))
}

/// GET /invoice/:memo
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(memo): Path<String>,
) -> AppResult<Json<InvoiceResponse>> {
    if memo.trim().is_empty() {
        return Err(AppError::InvalidInput("memo must not be empty".to_string()));
    }

    info!("Looking up invoice for memo: {}", memo);

    let invoice = state
        .ledger
        .find_invoice_by_memo(&memo)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No invoice with memo {}", memo)))?;

    Ok(Json(InvoiceResponse::from(invoice)))
}
