//! Per-client request quota
//!
//! Uses the governor crate for lock-free rate limiting, one limiter per client IP.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use tracing::{debug, warn};

use crate::error::{GateError, Result};

type DirectLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug)]
struct ClientLimiter {
    limiter: Arc<DirectLimiter>,
    last_seen_ms: AtomicU64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Requests-per-minute limiter keyed by client IP
#[derive(Clone)]
pub struct RateLimiter {
    /// `None` when limiting is disabled
    per_minute: Option<NonZeroU32>,
    limiters: Arc<DashMap<String, ClientLimiter>>,
    /// How long to keep per-client state without activity
    max_idle: Duration,
}

impl RateLimiter {
    /// A quota of 0 disables limiting.
    pub fn per_minute(requests: u32) -> Self {
        Self {
            per_minute: NonZeroU32::new(requests),
            limiters: Arc::new(DashMap::new()),
            max_idle: Duration::from_secs(10 * 60),
        }
    }

    pub fn disabled() -> Self {
        Self::per_minute(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.per_minute.is_some()
    }

    /// Check if a request from the given client IP is allowed
    pub fn check(&self, client_ip: &str) -> Result<()> {
        let Some(per_minute) = self.per_minute else {
            return Ok(());
        };

        let now_ms = now_ms();
        let limiter = {
            let entry = self
                .limiters
                .entry(client_ip.to_string())
                .or_insert_with(|| ClientLimiter {
                    limiter: Arc::new(GovRateLimiter::direct(Quota::per_minute(per_minute))),
                    last_seen_ms: AtomicU64::new(now_ms),
                });
            entry.last_seen_ms.store(now_ms, Ordering::Relaxed);
            entry.limiter.clone()
        };

        match limiter.check() {
            Ok(_) => {
                debug!("Rate limit check passed for {}", client_ip);
                Ok(())
            }
            Err(_) => {
                warn!("Rate limit exceeded for {}", client_ip);
                Err(GateError::RateLimitExceeded {
                    client_ip: client_ip.to_string(),
                })
            }
        }
    }

    /// Drop limiters idle for longer than `max_idle` (call periodically)
    pub fn cleanup(&self) {
        let now_ms = now_ms();
        let max_idle_ms = self.max_idle.as_millis() as u64;

        self.limiters.retain(|_, entry| {
            now_ms.saturating_sub(entry.last_seen_ms.load(Ordering::Relaxed)) <= max_idle_ms
        });
    }

    /// Get the number of tracked clients
    pub fn client_count(&self) -> usize {
        self.limiters.len()
    }

    /// Axum middleware enforcing the quota
    pub async fn enforce(
        State(limiter): State<RateLimiter>,
        req: Request<Body>,
        next: Next,
    ) -> Response {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        match limiter.check(&client_ip) {
            Ok(()) => next.run(req).await,
            Err(e) => e.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::disabled();
        assert!(!limiter.is_enabled());
        for _ in 0..100 {
            assert!(limiter.check("192.168.1.1").is_ok());
        }
        assert_eq!(limiter.client_count(), 0);
    }

    #[test]
    fn test_rate_limiter_allows_quota_then_blocks() {
        let limiter = RateLimiter::per_minute(5);

        for i in 0..5 {
            assert!(limiter.check("192.168.1.1").is_ok(), "Failed on request {}", i);
        }
        assert!(matches!(
            limiter.check("192.168.1.1"),
            Err(GateError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_rate_limiter_per_ip() {
        let limiter = RateLimiter::per_minute(1);

        assert!(limiter.check("192.168.1.1").is_ok());
        assert!(limiter.check("192.168.1.2").is_ok());
        assert!(limiter.check("192.168.1.1").is_err());
        assert_eq!(limiter.client_count(), 2);
    }

    #[test]
    fn test_cleanup_keeps_recent_clients() {
        let limiter = RateLimiter::per_minute(10);
        limiter.check("192.168.1.1").ok();
        limiter.cleanup();
        assert_eq!(limiter.client_count(), 1);
    }
}
