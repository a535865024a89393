//! Rotating public proxy pool
//!
//! This module provides:
//! - Aggregation of candidate proxies from public plaintext lists
//! - Liveness probing (HTTP CONNECT or curl)
//! - The shared pool with round-robin rotation and demotion

pub mod candidate;
pub mod health;
pub mod pool;
pub mod rotation;
pub mod sources;

pub use candidate::ProxyCandidate;
pub use health::{create_prober, ConnectProber, CurlProber, ProbeConfig, ProxyProber};
pub use pool::{PoolStatus, ProxyPool, ProxyPoolConfig, RefreshOutcome};
pub use rotation::WorkingSet;
pub use sources::{HttpListFetcher, ListFetcher, SourceAggregator, PROXY_LIST_SOURCES};
