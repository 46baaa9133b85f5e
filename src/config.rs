use std::path::{Path, PathBuf};
use std::time::Duration;

use config::ConfigError;

const DEFAULT_TLS_CERT_FILENAME: &str = "tls.cert";
const DEFAULT_MACAROON_FILENAME: &str = "admin.macaroon";
const DEFAULT_LND_DIR: &str = "~/.lnd";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_address: String,
    pub http_request_timeout: Duration,
    pub lnd: LndConfig,
    pub sync: SyncConfig,
}

/// Where and how to reach the node's REST gateway
#[derive(Debug, Clone)]
pub struct LndConfig {
    pub rest_url: String,
    pub tls_cert_path: PathBuf,
    pub macaroon_path: PathBuf,
    /// Upper bound on invoices scanned by the memo lookup
    pub memo_lookup_limit: u32,
}

/// Settlement sync tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bound applied to every single ledger or store call
    pub call_timeout: Duration,
    /// Zero disables the periodic re-scan
    pub rescan_interval: Duration,
    pub stream_reconnect: bool,
    pub reconnect_backoff_initial: Duration,
    pub reconnect_backoff_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            rescan_interval: Duration::ZERO,
            stream_reconnect: true,
            reconnect_backoff_initial: Duration::from_millis(500),
            reconnect_backoff_max: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let lnd_dir_raw = var("LND_DIR").unwrap_or_else(|| DEFAULT_LND_DIR.to_string());
        let lnd_dir = expand_path(&lnd_dir_raw, &lookup);
        let default_lnd_dir = expand_path(DEFAULT_LND_DIR, &lookup);

        let mut tls_cert_path = var("LND_TLS_CERT")
            .map(|p| expand_path(&p, &lookup))
            .unwrap_or_else(|| default_lnd_dir.join(DEFAULT_TLS_CERT_FILENAME));
        let mut macaroon_path = var("LND_MACAROON")
            .map(|p| expand_path(&p, &lookup))
            .unwrap_or_else(|| default_lnd_dir.join(DEFAULT_MACAROON_FILENAME));

        // A custom lnd dir pulls default-located credentials along with it
        if lnd_dir != default_lnd_dir {
            if tls_cert_path == default_lnd_dir.join(DEFAULT_TLS_CERT_FILENAME) {
                tls_cert_path = lnd_dir.join(DEFAULT_TLS_CERT_FILENAME);
            }
            if macaroon_path == default_lnd_dir.join(DEFAULT_MACAROON_FILENAME) {
                macaroon_path = lnd_dir.join(DEFAULT_MACAROON_FILENAME);
            }
        }

        let sync_defaults = SyncConfig::default();

        Ok(Self {
            database_url: var("DATABASE_URL")
                .ok_or_else(|| ConfigError::NotFound("DATABASE_URL".to_string()))?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", var("DB_MAX_CONNECTIONS"), 10)?,
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8090".to_string()),
            http_request_timeout: Duration::from_secs(parse_or(
                "HTTP_REQUEST_TIMEOUT_SECS",
                var("HTTP_REQUEST_TIMEOUT_SECS"),
                10,
            )?),
            lnd: LndConfig {
                rest_url: var("LND_REST_URL")
                    .unwrap_or_else(|| "https://localhost:8080".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                tls_cert_path,
                macaroon_path,
                memo_lookup_limit: parse_or("MEMO_LOOKUP_LIMIT", var("MEMO_LOOKUP_LIMIT"), 500)?,
            },
            sync: SyncConfig {
                call_timeout: Duration::from_secs(parse_or(
                    "SYNC_CALL_TIMEOUT_SECS",
                    var("SYNC_CALL_TIMEOUT_SECS"),
                    sync_defaults.call_timeout.as_secs(),
                )?),
                rescan_interval: Duration::from_secs(parse_or(
                    "SYNC_RESCAN_INTERVAL_SECS",
                    var("SYNC_RESCAN_INTERVAL_SECS"),
                    0,
                )?),
                stream_reconnect: parse_or(
                    "SYNC_STREAM_RECONNECT",
                    var("SYNC_STREAM_RECONNECT"),
                    sync_defaults.stream_reconnect,
                )?,
                reconnect_backoff_initial: Duration::from_millis(parse_or(
                    "SYNC_RECONNECT_BACKOFF_INITIAL_MS",
                    var("SYNC_RECONNECT_BACKOFF_INITIAL_MS"),
                    500,
                )?),
                reconnect_backoff_max: Duration::from_secs(parse_or(
                    "SYNC_RECONNECT_BACKOFF_MAX_SECS",
                    var("SYNC_RECONNECT_BACKOFF_MAX_SECS"),
                    60,
                )?),
            },
        })
        .and_then(Config::validated)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.sync.call_timeout.is_zero() {
            return Err(ConfigError::Message(
                "SYNC_CALL_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.sync.reconnect_backoff_initial > self.sync.reconnect_backoff_max {
            return Err(ConfigError::Message(
                "reconnect backoff initial delay exceeds the maximum".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Message(format!("invalid value for {}: {:?}", key, value))),
    }
}

/// Expands a leading `~` and `$VAR` / `${VAR}` references
pub fn expand_path<F>(path: &str, lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(path.len());
    let mut rest = path;

    if let Some(stripped) = rest.strip_prefix('~') {
        expanded.push_str(&lookup("HOME").unwrap_or_default());
        rest = stripped;
    }

    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            expanded.push(c);
            continue;
        }
        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for n in chars.by_ref() {
                if n == '}' {
                    break;
                }
                name.push(n);
            }
        } else {
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    name.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
        }
        if name.is_empty() {
            expanded.push('$');
        } else {
            expanded.push_str(&lookup(&name).unwrap_or_default());
        }
    }

    Path::new(&expanded).components().collect()
}
