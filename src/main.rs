mod adapters;
mod api;
mod bootstrap;
mod config;
mod error;
mod messages;
mod server;
mod settlement;
mod shutdown;
#[cfg(test)]
mod testing;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,invoice_sync=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting invoice settlement sync");

    let config = config::Config::from_env().context("invalid configuration")?;
    let app = bootstrap::initialize_app(&config)
        .await
        .context("failed to initialize the service")?;

    let shutdown = CancellationToken::new();
    shutdown::cancel_on_signal(shutdown.clone());

    // Settlement sync runs beside the HTTP server for the process lifetime
    let sync = app.coordinator.spawn(shutdown.child_token());
    let sync_watch = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = sync.await;
            // Without reconnects a failed stream ends the process so the
            // supervisor can restart it
            if !matches!(result, Ok(Ok(()))) {
                shutdown.cancel();
            }
            result
        })
    };

    let router = server::create_app(app.state, config.http_request_timeout);
    server::run_server(router, &config.bind_address, shutdown.clone())
        .await
        .with_context(|| format!("HTTP server on {} failed", config.bind_address))?;

    shutdown.cancel();
    match sync_watch.await.context("settlement sync watcher failed")? {
        Ok(Ok(())) => info!("👋 Shut down cleanly"),
        Ok(Err(e)) => {
            error!("Settlement sync failed: {}", e);
            return Err(anyhow::Error::new(e).context("settlement sync failed"));
        }
        Err(e) => {
            error!("Settlement sync task panicked: {}", e);
            return Err(anyhow::Error::new(e).context("settlement sync task panicked"));
        }
    }

    Ok(())
}
