// LND REST gateway client
//
// Every call goes through the node's grpc-gateway:
// - GET /v1/payreq/{pay_req}        decode a payment request
// - GET /v1/invoice/{r_hash_str}    look up an invoice by hex hash
// - GET /v1/invoices/subscribe      newline-delimited invoice updates
// - GET /v1/getinfo                 node identity
// - GET /v1/invoices                recent invoices, used for memo lookup
//
// Per-call deadlines are applied by the callers, so the HTTP client only
// carries a connect timeout and the subscription can stay open indefinitely.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::adapters::traits::{
    InvoiceEvent, InvoiceEventStream, InvoiceState, InvoiceSummary, LedgerClient, NodeInfo,
};
use crate::config::LndConfig;
use crate::error::{AppError, AppResult, LedgerError};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const EVENT_BUFFER: usize = 64;
const GRPC_INVALID_ARGUMENT: i64 = 3;
const GRPC_NOT_FOUND: i64 = 5;
const GRPC_UNAVAILABLE: i64 = 14;

pub struct LndRestClient {
    http: Client,
    base_url: String,
    macaroon_hex: String,
    memo_lookup_limit: u32,
}

// ========== WIRE TYPES ==========

/// grpc-gateway error body; older gateways use `error` instead of `message`
#[derive(Debug, Default, Deserialize)]
struct RestError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RestError {
    fn text(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct PayReqResponse {
    payment_hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct LndInvoice {
    #[serde(default)]
    memo: String,
    #[serde(default)]
    r_hash: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    creation_date: Option<String>,
    #[serde(default)]
    payment_request: String,
}

impl LndInvoice {
    fn is_settled(&self) -> bool {
        // `settled` is deprecated in newer nodes in favour of `state`
        self.settled || self.state.as_deref() == Some("SETTLED")
    }

    /// `r_hash` is base64 bytes on the REST gateway
    fn payment_hash_hex(&self) -> Option<String> {
        let raw = self.r_hash.as_deref()?;
        let engine = base64::engine::general_purpose::STANDARD;
        engine.decode(raw).ok().map(hex::encode)
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.creation_date.as_deref()?.parse::<i64>().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    fn into_event(self) -> InvoiceEvent {
        InvoiceEvent {
            is_settled: self.is_settled(),
            payment_hash: self.payment_hash_hex(),
            payment_request: self.payment_request,
        }
    }

    fn into_summary(self) -> InvoiceSummary {
        InvoiceSummary {
            settled: self.is_settled(),
            payment_hash: self.payment_hash_hex(),
            created_at: self.created_at(),
            value_sat: self
                .value
                .as_deref()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            memo: self.memo,
            payment_request: self.payment_request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListInvoicesResponse {
    #[serde(default)]
    invoices: Vec<LndInvoice>,
}

#[derive(Debug, Deserialize)]
struct GetInfoResponse {
    identity_pubkey: String,
    #[serde(default)]
    alias: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEnvelope {
    #[serde(default)]
    result: Option<LndInvoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

// ========== CLIENT ==========

impl LndRestClient {
    pub fn new(http: Client, base_url: String, macaroon_hex: String, memo_lookup_limit: u32) -> Self {
        Self {
            http,
            base_url,
            macaroon_hex,
            memo_lookup_limit,
        }
    }

    /// Load the node's TLS certificate and macaroon from disk
    pub fn from_config(config: &LndConfig) -> AppResult<Self> {
        let cert_pem = std::fs::read(&config.tls_cert_path).map_err(|e| {
            AppError::Config(format!(
                "cannot read TLS certificate {}: {}",
                config.tls_cert_path.display(),
                e
            ))
        })?;
        let macaroon = std::fs::read(&config.macaroon_path).map_err(|e| {
            AppError::Config(format!(
                "cannot read macaroon {}: {}",
                config.macaroon_path.display(),
                e
            ))
        })?;

        let certificate = reqwest::Certificate::from_pem(&cert_pem)
            .map_err(|e| AppError::Config(format!("invalid TLS certificate: {}", e)))?;

        let http = Client::builder()
            .add_root_certificate(certificate)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("cannot build HTTP client: {}", e)))?;

        info!("✅ LND REST client configured for {}", config.rest_url);

        Ok(Self::new(
            http,
            config.rest_url.clone(),
            hex::encode(macaroon),
            config.memo_lookup_limit,
        ))
    }

    /// Build a gateway URL; every segment is percent-encoded on its own
    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::Config(format!("invalid LND REST url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("LND REST url {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, url: Url) -> RequestBuilder {
        self.http.get(url).header(MACAROON_HEADER, &self.macaroon_hex)
    }

    async fn get(&self, segments: &[&str]) -> AppResult<Response> {
        let url = self.endpoint(segments)?;
        Ok(self.request(url).send().await?)
    }

    /// Split a response into its body or a parsed gateway error
    async fn into_result(response: Response) -> AppResult<Result<Response, (StatusCode, RestError)>> {
        let status = response.status();
        if status.is_success() {
            return Ok(Ok(response));
        }
        let body = response.text().await?;
        let error = serde_json::from_str::<RestError>(&body).unwrap_or_else(|_| RestError {
            message: Some(body.trim().to_string()),
            ..Default::default()
        });
        Ok(Err((status, error)))
    }

    fn rpc_error(status: StatusCode, error: &RestError) -> AppError {
        LedgerError::Rpc {
            status: status.as_u16(),
            message: error.text(),
        }
        .into()
    }
}

/// Fragments of the errors lnd returns when a payment request fails to decode
const DECODE_ERROR_MARKERS: &[&str] = &[
    "invalid bech32",
    "checksum failed",
    "invalid index",
    "invalid character",
    "invalid payment request",
    "not all lowercase or all uppercase",
    "failed converting data",
    "unknown human-readable part",
];

/// A node that is up but reports the payment request itself as bad.
///
/// Auth failures and wrong routes (401, 403, 404) are remote failures, not
/// bad input.
fn is_rejection(status: StatusCode, error: &RestError) -> bool {
    if error.code == Some(GRPC_UNAVAILABLE) {
        return false;
    }
    match status {
        StatusCode::BAD_REQUEST => true,
        StatusCode::INTERNAL_SERVER_ERROR => {
            let text = error.text().to_lowercase();
            error.code == Some(GRPC_INVALID_ARGUMENT)
                || DECODE_ERROR_MARKERS.iter().any(|marker| text.contains(marker))
        }
        _ => false,
    }
}

fn is_not_found(status: StatusCode, error: &RestError) -> bool {
    status == StatusCode::NOT_FOUND
        || error.code == Some(GRPC_NOT_FOUND)
        || error.text().contains("unable to locate invoice")
}

#[async_trait]
impl LedgerClient for LndRestClient {
    fn name(&self) -> &'static str {
        "lnd-rest"
    }

    async fn decode_payment_request(&self, payment_request: &str) -> AppResult<String> {
        let response = self.get(&["v1", "payreq", payment_request]).await?;
        match Self::into_result(response).await? {
            Ok(response) => {
                let decoded: PayReqResponse = serde_json::from_slice(&response.bytes().await?)?;
                Ok(decoded.payment_hash)
            }
            Err((status, error)) if is_rejection(status, &error) => {
                Err(LedgerError::InvalidPaymentRequest(error.text()).into())
            }
            Err((status, error)) => Err(Self::rpc_error(status, &error)),
        }
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> AppResult<Option<InvoiceState>> {
        let response = self.get(&["v1", "invoice", payment_hash]).await?;
        match Self::into_result(response).await? {
            Ok(response) => {
                let invoice: LndInvoice = serde_json::from_slice(&response.bytes().await?)?;
                Ok(Some(InvoiceState {
                    payment_hash: payment_hash.to_string(),
                    is_settled: invoice.is_settled(),
                }))
            }
            Err((status, error)) if is_not_found(status, &error) => {
                debug!("Invoice {} unknown to node: {}", payment_hash, error.text());
                Ok(None)
            }
            Err((status, error)) => Err(Self::rpc_error(status, &error)),
        }
    }

    /// Returns as soon as the request is queued. The gateway holds back the
    /// response headers until the first invoice update, so the HTTP exchange
    /// runs inside the pump task and its failures arrive on the stream.
    async fn subscribe_settlements(&self) -> AppResult<InvoiceEventStream> {
        let request = self.request(self.endpoint(&["v1", "invoices", "subscribe"])?);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(open_subscription(request, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn node_info(&self) -> AppResult<NodeInfo> {
        let response = self.get(&["v1", "getinfo"]).await?;
        match Self::into_result(response).await? {
            Ok(response) => {
                let info: GetInfoResponse = serde_json::from_slice(&response.bytes().await?)?;
                Ok(NodeInfo {
                    pubkey: info.identity_pubkey,
                    alias: info.alias,
                })
            }
            Err((status, error)) => Err(Self::rpc_error(status, &error)),
        }
    }

    async fn find_invoice_by_memo(&self, memo: &str) -> AppResult<Option<InvoiceSummary>> {
        let mut url = self.endpoint(&["v1", "invoices"])?;
        url.query_pairs_mut()
            .append_pair("reversed", "true")
            .append_pair("num_max_invoices", &self.memo_lookup_limit.to_string());
        let response = self.request(url).send().await?;
        let response = match Self::into_result(response).await? {
            Ok(response) => response,
            Err((status, error)) => return Err(Self::rpc_error(status, &error)),
        };

        let listed: ListInvoicesResponse = serde_json::from_slice(&response.bytes().await?)?;
        Ok(newest_with_memo(listed.invoices, memo))
    }
}

fn newest_with_memo(invoices: Vec<LndInvoice>, memo: &str) -> Option<InvoiceSummary> {
    invoices
        .into_iter()
        .filter(|invoice| invoice.memo == memo)
        .map(LndInvoice::into_summary)
        .max_by_key(|summary| summary.created_at)
}

// ========== SUBSCRIPTION PARSING ==========

/// Send the subscription request, then pump its body into `tx`
async fn open_subscription(request: RequestBuilder, tx: mpsc::Sender<AppResult<InvoiceEvent>>) {
    let sent = tokio::select! {
        _ = tx.closed() => return,
        sent = request.send() => sent,
    };

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(Err(e.into())).await;
            return;
        }
    };

    match LndRestClient::into_result(response).await {
        Ok(Ok(response)) => {
            info!("📡 Subscribed to invoice updates");
            pump_subscription(response.bytes_stream(), tx).await;
        }
        Ok(Err((status, error))) => {
            let _ = tx.send(Err(LndRestClient::rpc_error(status, &error))).await;
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
        }
    }
}

/// Forward parsed subscription lines until the body ends, fails, or the
/// receiving side goes away.
async fn pump_subscription<S, B, E>(body: S, tx: mpsc::Sender<AppResult<InvoiceEvent>>)
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut body = Box::pin(body);
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!("Invoice subscription receiver dropped");
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(bytes.as_ref());
                for line in drain_lines(&mut buffer) {
                    if !forward_line(&line, &tx).await {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                let _ = tx.send(Err(LedgerError::Stream(e.to_string()).into())).await;
                return;
            }
            None => {
                // A final object without a trailing newline is still complete
                let rest = String::from_utf8_lossy(&buffer).to_string();
                forward_line(&rest, &tx).await;
                debug!("Invoice subscription body ended");
                return;
            }
        }
    }
}

/// Returns false once forwarding should stop
async fn forward_line(line: &str, tx: &mpsc::Sender<AppResult<InvoiceEvent>>) -> bool {
    match parse_subscription_line(line) {
        Ok(Some(event)) => tx.send(Ok(event)).await.is_ok(),
        Ok(None) => true,
        Err(e) => {
            warn!("Invoice subscription reported an error: {}", e);
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

/// Removes every complete line from `buffer`, leaving any partial tail
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).to_string());
    }
    lines
}

fn parse_subscription_line(line: &str) -> AppResult<Option<InvoiceEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let envelope: SubscriptionEnvelope = serde_json::from_str(line)?;
    if let Some(error) = envelope.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(LedgerError::Stream(message).into());
    }

    Ok(envelope.result.map(LndInvoice::into_event))
}
