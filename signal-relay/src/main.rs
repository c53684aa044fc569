use std::sync::Arc;

use signal_relay::api::{self, AppState};
use signal_relay::config::LogFormat;
use signal_relay::{
    BinanceGateway, Config, CredentialCipher, Database, MemoryStore, SignalFeed, Store,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "signal_relay=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    if config.uses_memory_store() {
        warn!("Using in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let database = Database::connect(&config.database_url).await?;
    database.initialize().await?;
    info!("Database connected");
    Ok(Arc::new(database))
}

async fn open_feed(config: &Config) -> Option<SignalFeed> {
    let url = config.redis_url.as_deref()?;
    match SignalFeed::connect(url).await {
        Ok(feed) => {
            info!("Signal feed connected");
            Some(feed)
        }
        Err(e) => {
            error!(error = %e, "Failed to connect signal feed; continuing without it");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!(
        exchange = %config.binance_base_url,
        test_mode = config.binance_test_mode,
        "Starting signal relay"
    );

    let store = open_store(&config).await?;
    let cipher = Arc::new(CredentialCipher::from_passphrase(&config.crypto_secret_key)?);
    let gateway = Arc::new(BinanceGateway::new(
        &config.binance_base_url,
        config.binance_timeout,
        cipher.clone(),
    )?);
    let feed = open_feed(&config).await;

    let state = AppState::new(&config, store, cipher, gateway, feed);
    let app = api::router(state, &config)?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}
