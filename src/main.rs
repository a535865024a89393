//! ytgate - Entry Point
//!
//! Wires the proxy pool, executor and yt-dlp client together and serves the HTTP API with
//! graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ytgate::api::server::AppState;
use ytgate::api::ApiServer;
use ytgate::config::{Config, LogConfig};
use ytgate::exec::{ExecutorConfig, ProcessRunner, ProxyMode, ResilientExecutor};
use ytgate::proxy::{create_prober, HttpListFetcher, ProxyPool, ProxyPoolConfig, SourceAggregator};
use ytgate::ytdlp::YtdlpClient;

/// Live proxies looked for by the startup refresh
const STARTUP_REFRESH_TARGET: usize = 5;

#[tokio::main]
async fn main() -> ytgate::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting ytgate");

    let mode = ProxyMode::from_config(&config.proxy);
    info!("Proxy mode: {}", mode.as_str());
    if let ProxyMode::Static { proxy, fallback_direct } = &mode {
        info!(
            "Using static proxy {} (direct fallback: {})",
            proxy.redacted(),
            fallback_direct
        );
    }

    // Proxy pool (only active in rotating mode)
    let aggregator = SourceAggregator::with_default_sources(Arc::new(HttpListFetcher::new()?));
    let pool = Arc::new(ProxyPool::new(
        ProxyPoolConfig {
            enabled: mode == ProxyMode::Rotating,
            fetch_interval: config.proxy.refresh_interval,
            ..ProxyPoolConfig::default()
        },
        aggregator,
        create_prober(config.proxy.probe),
    ));

    let executor = Arc::new(ResilientExecutor::new(
        mode.clone(),
        ExecutorConfig {
            max_retries: config.proxy.max_retries,
            ..ExecutorConfig::default()
        },
        pool.clone(),
        Arc::new(ProcessRunner),
    ));
    let ytdlp = Arc::new(YtdlpClient::new(config.ytdlp.clone(), executor));

    // Warm the pool without delaying startup
    if mode == ProxyMode::Rotating {
        let pool = pool.clone();
        tokio::spawn(async move {
            info!("Initializing proxy pool...");
            let found = pool.find_working_proxies(STARTUP_REFRESH_TARGET).await;
            info!("Proxy pool ready with {} working proxies", found.len());
        });
    }

    let state = AppState::new(config.clone(), pool, ytdlp)?;
    let api_server = ApiServer::new(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(shutdown_rx).await {
            error!("API server error: {}", e);
        }
    });

    info!("Server started on {}", config.server_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = api_task.await;

    info!("ytgate stopped");
    Ok(())
}

/// `RUST_LOG` wins over `LOG_LEVEL`; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ytgate={},tower_http=info", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
