use crate::error::{GateError, Result};
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// yt-dlp invocation configuration
    pub ytdlp: YtdlpConfig,
    /// Outbound proxy configuration
    pub proxy: ProxyConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on (default: 3000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
    /// Requests per minute per client IP (0 = disabled)
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct YtdlpConfig {
    /// Path to the yt-dlp binary
    pub path: String,
    /// Session cookie header passed through to yt-dlp
    pub cookie: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Route yt-dlp through the rotating public proxy pool
    pub enabled: bool,
    /// Fixed proxy that replaces the pool entirely when set
    pub static_proxy: Option<StaticProxyConfig>,
    /// Retry directly when the static proxy fails
    pub static_fallback_direct: bool,
    /// Proxied attempts per execution
    pub max_retries: u32,
    /// How candidates are probed for liveness
    pub probe: ProbeMethod,
    /// Minimum age of the candidate list before it is fetched again
    pub refresh_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticProxyProtocol {
    Http,
    Socks5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProxyConfig {
    pub protocol: StaticProxyProtocol,
    /// Normalized proxy URL handed to yt-dlp's `--proxy`
    pub url: String,
}

impl StaticProxyConfig {
    /// Proxy URL with any credentials masked, for logging
    pub fn redacted(&self) -> String {
        redact_credentials(&self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMethod {
    #[default]
    Connect,
    Curl,
}

impl ProbeMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "connect" | "" => Some(Self::Connect),
            "curl" => Some(Self::Curl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Curl => "curl",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let probe = get_env_or("PROXY_PROBE", "connect");

        Ok(Config {
            server: ServerConfig {
                port: get_env_or("PORT", "3000").parse().map_err(|_| {
                    GateError::InvalidConfig("PORT must be a valid port number".into())
                })?,
                host: get_env_or("HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                rate_limit_per_minute: get_env_or("RATE_LIMIT_PER_MINUTE", "60")
                    .parse()
                    .map_err(|_| {
                        GateError::InvalidConfig(
                            "RATE_LIMIT_PER_MINUTE must be a valid number".into(),
                        )
                    })?,
            },
            ytdlp: YtdlpConfig {
                path: get_env_or("YTDLP_PATH", "yt-dlp"),
                cookie: env::var("YT_COOKIE").ok().filter(|c| !c.trim().is_empty()),
            },
            proxy: ProxyConfig {
                enabled: get_env_or("USE_PROXY", "false").parse().unwrap_or(false),
                static_proxy: parse_static_proxy()?,
                static_fallback_direct: get_env_or("YTDLP_PROXY_FALLBACK", "true")
                    .parse()
                    .unwrap_or(true),
                max_retries: get_env_or("PROXY_MAX_RETRIES", "3").parse().unwrap_or(3),
                probe: ProbeMethod::from_str(&probe).ok_or_else(|| {
                    GateError::InvalidConfig(format!(
                        "PROXY_PROBE must be 'connect' or 'curl', got '{}'",
                        probe
                    ))
                })?,
                refresh_interval: Duration::from_secs(
                    get_env_or("PROXY_REFRESH_INTERVAL", "600")
                        .parse()
                        .map_err(|_| {
                            GateError::InvalidConfig(
                                "PROXY_REFRESH_INTERVAL must be a number of seconds".into(),
                            )
                        })?,
                ),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the HTTP server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_static_proxy() -> Result<Option<StaticProxyConfig>> {
    let raw = env::var("YTDLP_PROXY").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|e| {
        GateError::InvalidConfig(format!("YTDLP_PROXY must be a valid URL: {}", e))
    })?;

    if url.fragment().is_some() || url.query().is_some() {
        return Err(GateError::InvalidConfig(
            "YTDLP_PROXY must not include query/fragment".into(),
        ));
    }
    if !(url.path().is_empty() || url.path() == "/") {
        return Err(GateError::InvalidConfig(
            "YTDLP_PROXY must not include a path".into(),
        ));
    }

    let protocol = match url.scheme().to_lowercase().as_str() {
        "http" | "https" => StaticProxyProtocol::Http,
        "socks5" | "socks5h" => StaticProxyProtocol::Socks5,
        other => {
            return Err(GateError::InvalidConfig(format!(
                "YTDLP_PROXY has unsupported scheme: {}",
                other
            )))
        }
    };

    if url.host_str().is_none() {
        return Err(GateError::InvalidConfig(
            "YTDLP_PROXY must include a host".into(),
        ));
    }

    Ok(Some(StaticProxyConfig {
        protocol,
        url: url.as_str().trim_end_matches('/').to_string(),
    }))
}

/// Replace the userinfo part of a proxy URL so it can be logged.
pub fn redact_credentials(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_password(None);
            let _ = url.set_username("redacted");
            url.as_str().trim_end_matches('/').to_string()
        }
        Ok(_) => raw.to_string(),
        Err(_) => "<invalid proxy url>".to_string(),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
