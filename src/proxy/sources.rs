//! Public proxy list aggregation
//!
//! Pulls plaintext `ip:port` lists from a fixed set of providers and merges them into one
//! deduplicated candidate list. A provider that fails is skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::candidate::ProxyCandidate;
use crate::error::Result;

/// Plaintext proxy list providers
pub const PROXY_LIST_SOURCES: [&str; 5] = [
    "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
    "https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt",
];

/// Timeout for a single list download
pub const SOURCE_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Fetches the raw body of a proxy list
#[async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// [`ListFetcher`] backed by reqwest
pub struct HttpListFetcher {
    client: reqwest::Client,
}

impl HttpListFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SOURCE_FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ListFetcher for HttpListFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

/// Merges candidates from every configured source
pub struct SourceAggregator {
    fetcher: Arc<dyn ListFetcher>,
    sources: Vec<String>,
}

impl SourceAggregator {
    pub fn new(fetcher: Arc<dyn ListFetcher>, sources: Vec<String>) -> Self {
        Self { fetcher, sources }
    }

    /// Aggregator over [`PROXY_LIST_SOURCES`]
    pub fn with_default_sources(fetcher: Arc<dyn ListFetcher>) -> Self {
        Self::new(
            fetcher,
            PROXY_LIST_SOURCES.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Fetch every source and return the deduplicated candidates.
    ///
    /// Never fails: sources that error out contribute nothing.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> Vec<ProxyCandidate> {
        let mut all = Vec::new();

        for source in &self.sources {
            match self.fetcher.fetch(source).await {
                Ok(body) => {
                    let parsed = parse_proxy_list(&body);
                    info!("Fetched {} proxies from {}", parsed.len(), source_host(source));
                    all.extend(parsed);
                }
                Err(e) => {
                    warn!("Failed to fetch from {}: {}", source_host(source), e);
                }
            }
        }

        let unique = dedup(all);
        info!("Total unique proxies: {}", unique.len());
        unique
    }
}

/// Parse a newline-separated list, silently dropping lines that are not `ipv4:port`.
pub fn parse_proxy_list(body: &str) -> Vec<ProxyCandidate> {
    body.lines()
        .filter_map(|line| ProxyCandidate::parse(line).ok())
        .collect()
}

/// Drop repeated candidates, keeping the first occurrence.
fn dedup(candidates: Vec<ProxyCandidate>) -> Vec<ProxyCandidate> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

fn source_host(source: &str) -> String {
    url::Url::parse(source)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| source.to_string())
}
