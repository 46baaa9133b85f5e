use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    adapters::{LedgerClient, LndRestClient},
    api::handler::AppState,
    config::Config,
    error::AppResult,
    messages::{PgMessageRepository, RecordStore},
    settlement::{SyncCoordinator, SyncStatus},
};

/// Everything `main` needs to run the service
pub struct App {
    pub state: AppState,
    pub coordinator: SyncCoordinator,
}

pub async fn initialize_app(config: &Config) -> AppResult<App> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url, config.db_max_connections).await?;
    let store: Arc<dyn RecordStore> = Arc::new(PgMessageRepository::new(pool));
    info!("✅ Message store initialized");

    let ledger: Arc<dyn LedgerClient> = Arc::new(LndRestClient::from_config(&config.lnd)?);

    let sync_status = Arc::new(SyncStatus::new());
    let coordinator = SyncCoordinator::new(
        ledger.clone(),
        store,
        config.sync.clone(),
        sync_status.clone(),
    );
    info!(
        "✅ Settlement sync configured (call timeout {:?}, rescan {})",
        config.sync.call_timeout,
        if config.sync.rescan_interval.is_zero() {
            "disabled".to_string()
        } else {
            format!("every {:?}", config.sync.rescan_interval)
        }
    );

    Ok(App {
        state: AppState {
            ledger,
            sync_status,
        },
        coordinator,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
