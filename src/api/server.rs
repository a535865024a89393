//! API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{GateError, Result};
use crate::proxy::ProxyPool;
use crate::ytdlp::YtdlpClient;

use super::middleware::{cors_layer, RateLimiter, RequestLogging};
use super::routes;

/// Maximum accepted request body
const BODY_LIMIT: usize = 1024 * 1024;

/// How often idle rate-limiter entries are swept
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: Arc<ProxyPool>,
    pub ytdlp: Arc<YtdlpClient>,
    /// Client used to relay direct media URLs
    pub http: reqwest::Client,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, pool: Arc<ProxyPool>, ytdlp: Arc<YtdlpClient>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        let rate_limiter = RateLimiter::per_minute(config.server.rate_limit_per_minute);

        Ok(Self {
            config,
            pool,
            ytdlp,
            http,
            rate_limiter,
        })
    }
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with every layer applied
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.state.config.server.cors_origins);

        routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(BODY_LIMIT))
            .layer(axum::middleware::from_fn(RequestLogging::log_request))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self.state.config.server_addr().parse().map_err(|_| {
            GateError::InvalidConfig(format!(
                "Invalid server address: {}",
                self.state.config.server_addr()
            ))
        })?;

        let router = self.build_router();

        let limiter = self.state.rate_limiter.clone();
        let cleanup = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                limiter.cleanup();
            }
        });

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await;

        cleanup.abort();
        served.map_err(|e| GateError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{LogConfig, ProbeMethod, ProxyConfig, ServerConfig, YtdlpConfig};
    use crate::proxy::pool::tests::test_pool;
    use crate::ytdlp::client::tests::{client_with, CannedRunner};

    pub(crate) fn test_config(rate_limit_per_minute: u32) -> Config {
        Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                cors_origins: vec![],
                rate_limit_per_minute,
            },
            ytdlp: YtdlpConfig {
                path: "yt-dlp".to_string(),
                cookie: None,
            },
            proxy: ProxyConfig {
                enabled: false,
                static_proxy: None,
                static_fallback_direct: true,
                max_retries: 3,
                probe: ProbeMethod::Connect,
                refresh_interval: Duration::from_secs(600),
            },
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    /// State backed by a canned yt-dlp and a pool over a static candidate list
    pub(crate) fn test_state(
        runner: Arc<CannedRunner>,
        pool: ProxyPool,
        rate_limit: u32,
    ) -> AppState {
        AppState::new(
            test_config(rate_limit),
            Arc::new(pool),
            Arc::new(client_with(runner, None)),
        )
        .unwrap()
    }

    #[test]
    fn test_state_uses_configured_rate_limit() {
        let state = test_state(CannedRunner::ok(""), test_pool(false, "", &[]), 0);
        assert!(!state.rate_limiter.is_enabled());

        let state = test_state(CannedRunner::ok(""), test_pool(false, "", &[]), 60);
        assert!(state.rate_limiter.is_enabled());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let state = test_state(CannedRunner::ok(""), test_pool(false, "", &[]), 60);
        let server = ApiServer::new(state);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { server.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
