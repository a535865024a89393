//! Liveness probing for proxy candidates
//!
//! A candidate is live when it can open a tunnel to a well-known host. Every failure mode
//! (refused, timed out, non-200 reply) collapses to `false`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument};

use super::candidate::ProxyCandidate;
use crate::config::ProbeMethod;

/// Decides whether a candidate is usable
#[async_trait]
pub trait ProxyProber: Send + Sync {
    async fn probe(&self, candidate: &ProxyCandidate) -> bool;
}

/// Probe configuration
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Host the tunnel is opened to
    pub target_host: String,
    /// Port the tunnel is opened to
    pub target_port: u16,
    /// Upper bound for one probe
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_host: "www.google.com".to_string(),
            target_port: 80,
            timeout: Duration::from_secs(8),
        }
    }
}

/// Probes with a raw HTTP `CONNECT` request
pub struct ConnectProber {
    config: ProbeConfig,
}

impl ConnectProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProxyProber for ConnectProber {
    #[instrument(skip(self), fields(proxy = %candidate))]
    async fn probe(&self, candidate: &ProxyCandidate) -> bool {
        let result = timeout(
            self.config.timeout,
            open_tunnel(candidate, &self.config.target_host, self.config.target_port),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(
                    "Proxy {} is live (CONNECT to {}:{} successful)",
                    candidate, self.config.target_host, self.config.target_port
                );
                true
            }
            Ok(Err(e)) => {
                debug!("Proxy {} is dead: {}", candidate, e);
                false
            }
            Err(_) => {
                debug!("Proxy {} is dead: connect timed out", candidate);
                false
            }
        }
    }
}

async fn open_tunnel(
    candidate: &ProxyCandidate,
    target_host: &str,
    target_port: u16,
) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(candidate.as_str()).await?;

    let authority = format!("{}:{}", target_host, target_port);
    let request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", authority, authority);
    stream.write_all(request.as_bytes()).await?;

    let mut response = vec![0u8; 1024];
    let n = stream.read(&mut response).await?;
    if n == 0 {
        anyhow::bail!("empty CONNECT response");
    }

    let response_str = String::from_utf8_lossy(&response[..n]);
    let status_line = response_str.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let is_http = parts.next().is_some_and(|v| v.starts_with("HTTP/1."));
    if !is_http || parts.next() != Some("200") {
        anyhow::bail!("CONNECT failed: {}", status_line);
    }

    Ok(())
}

/// Probes by running `curl` through the candidate
pub struct CurlProber {
    curl_path: String,
    target_url: String,
    timeout: Duration,
}

impl CurlProber {
    pub fn new(curl_path: impl Into<String>) -> Self {
        Self {
            curl_path: curl_path.into(),
            target_url: "http://www.google.com".to_string(),
            timeout: Duration::from_secs(12),
        }
    }
}

#[async_trait]
impl ProxyProber for CurlProber {
    #[instrument(skip(self), fields(proxy = %candidate))]
    async fn probe(&self, candidate: &ProxyCandidate) -> bool {
        let mut child = match Command::new(&self.curl_path)
            .arg("-x")
            .arg(candidate.proxy_url())
            .args(["-s", "--connect-timeout", "5", "--max-time", "10"])
            .arg(&self.target_url)
            .args(["-o", "/dev/null"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!("Could not start {}: {}", self.curl_path, e);
                return false;
            }
        };

        match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("curl through {} exited with {}", candidate, status);
                status.success()
            }
            Ok(Err(e)) => {
                debug!("curl through {} failed: {}", candidate, e);
                false
            }
            Err(_) => {
                debug!("curl through {} timed out, killing", candidate);
                let _ = child.kill().await;
                false
            }
        }
    }
}

/// Build the prober selected in configuration
pub fn create_prober(method: ProbeMethod) -> Arc<dyn ProxyProber> {
    match method {
        ProbeMethod::Connect => Arc::new(ConnectProber::new(ProbeConfig::default())),
        ProbeMethod::Curl => Arc::new(CurlProber::new("curl")),
    }
}
