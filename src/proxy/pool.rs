//! Shared proxy pool state
//!
//! Owns the candidate list fetched from public sources and the working set confirmed by
//! probing. State mutations happen under a short synchronous lock that is never held across an
//! await; whole refresh passes (fetch + probe) are serialized by a separate async lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::candidate::ProxyCandidate;
use super::health::ProxyProber;
use super::rotation::WorkingSet;
use super::sources::SourceAggregator;

/// Pool tuning
#[derive(Clone, Debug)]
pub struct ProxyPoolConfig {
    /// Whether the pool does anything at all
    pub enabled: bool,
    /// Candidates older than this are fetched again before probing
    pub fetch_interval: Duration,
    /// Maximum candidates probed per refresh pass
    pub probe_budget: usize,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fetch_interval: Duration::from_secs(10 * 60),
            probe_budget: 100,
        }
    }
}

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub enabled: bool,
    #[serde(rename = "workingProxies")]
    pub working_count: usize,
    #[serde(rename = "totalProxies")]
    pub total_candidates: usize,
    /// RFC 3339 time of the last candidate fetch
    #[serde(rename = "lastFetch")]
    pub last_fetch: Option<String>,
}

/// Result of a manual refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub success: bool,
    #[serde(rename = "workingProxies")]
    pub working_count: usize,
}

#[derive(Default)]
struct PoolState {
    candidates: Vec<ProxyCandidate>,
    working: WorkingSet,
    last_fetch: Option<DateTime<Utc>>,
}

/// Candidate pool plus the round-robin working set
pub struct ProxyPool {
    config: ProxyPoolConfig,
    aggregator: SourceAggregator,
    prober: Arc<dyn ProxyProber>,
    state: Mutex<PoolState>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ProxyPool {
    pub fn new(
        config: ProxyPoolConfig,
        aggregator: SourceAggregator,
        prober: Arc<dyn ProxyProber>,
    ) -> Self {
        Self {
            config,
            aggregator,
            prober,
            state: Mutex::new(PoolState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Re-fetch every source and overwrite the candidate list, even with an empty result.
    pub async fn refresh_candidates(&self) -> usize {
        let candidates = self.aggregator.collect().await;
        let count = candidates.len();

        let mut state = self.state.lock();
        state.candidates = candidates;
        state.last_fetch = Some(Utc::now());
        count
    }

    /// Probe candidates until `target` live proxies are found and make them the working set.
    ///
    /// The previous working set is discarded unconditionally.
    pub async fn find_working_proxies(&self, target: usize) -> Vec<ProxyCandidate> {
        if !self.config.enabled {
            debug!("Proxy pool disabled, skipping probe pass");
            return Vec::new();
        }

        let _refresh = self.refresh_lock.lock().await;
        self.probe_pass(target).await
    }

    /// Run a probe pass only if the working set is still below `min` once any in-flight
    /// refresh has finished.
    pub async fn ensure_working(&self, min: usize, target: usize) -> usize {
        if !self.config.enabled || self.working_count() >= min {
            return self.working_count();
        }

        let _refresh = self.refresh_lock.lock().await;
        if self.working_count() < min {
            info!("Finding working proxies...");
            self.probe_pass(target).await;
        }
        self.working_count()
    }

    /// Manual refresh used by the admin endpoint
    pub async fn refresh_now(&self, target: usize) -> RefreshOutcome {
        let found = self.find_working_proxies(target).await;
        RefreshOutcome {
            success: true,
            working_count: found.len(),
        }
    }

    #[instrument(skip(self))]
    async fn probe_pass(&self, target: usize) -> Vec<ProxyCandidate> {
        if self.candidates_stale() {
            self.refresh_candidates().await;
        }

        let to_test = {
            let mut sample = self.state.lock().candidates.clone();
            sample.shuffle(&mut rand::thread_rng());
            sample.truncate(self.config.probe_budget);
            sample
        };

        info!(
            "Testing up to {} proxies to find {} working ones...",
            to_test.len(),
            target
        );

        let mut found = Vec::new();
        for candidate in to_test {
            if found.len() >= target {
                break;
            }
            if self.prober.probe(&candidate).await {
                info!("Found working proxy: {}", candidate);
                found.push(candidate);
            }
        }

        info!("Found {} working proxies", found.len());
        self.state.lock().working.replace(found.clone());
        found
    }

    fn candidates_stale(&self) -> bool {
        let state = self.state.lock();
        if state.candidates.is_empty() {
            return true;
        }
        match state.last_fetch {
            None => true,
            Some(at) => Utc::now()
                .signed_duration_since(at)
                .to_std()
                .map(|age| age > self.config.fetch_interval)
                .unwrap_or(false),
        }
    }

    /// Next proxy in round-robin order
    pub fn next(&self) -> Option<ProxyCandidate> {
        self.state.lock().working.next()
    }

    /// Drop a proxy from the working set after a failure
    pub fn mark_bad(&self, proxy: &ProxyCandidate) {
        let mut state = self.state.lock();
        if state.working.mark_bad(proxy) {
            info!(
                "Removed bad proxy: {}. {} proxies remaining",
                proxy,
                state.working.len()
            );
        }
    }

    pub fn working_count(&self) -> usize {
        self.state.lock().working.len()
    }

    pub fn candidate_count(&self) -> usize {
        self.state.lock().candidates.len()
    }

    /// Copy of the working set in rotation order
    pub fn working_proxies(&self) -> Vec<ProxyCandidate> {
        self.state.lock().working.proxies().to_vec()
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            enabled: self.config.enabled,
            working_count: state.working.len(),
            total_candidates: state.candidates.len(),
            last_fetch: state.last_fetch.map(|t| t.to_rfc3339()),
        }
    }

    #[cfg(test)]
    pub(crate) fn seed(&self, candidates: &[&str], working: &[&str]) {
        let parse = |list: &[&str]| {
            list.iter()
                .map(|a| ProxyCandidate::parse(a).unwrap())
                .collect::<Vec<_>>()
        };
        let mut state = self.state.lock();
        state.candidates = parse(candidates);
        state.working.replace(parse(working));
        state.last_fetch = Some(Utc::now());
    }
}
