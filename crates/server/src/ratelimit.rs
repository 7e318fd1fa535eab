//! Request rate limiting using a token bucket algorithm.
//!
//! Two request classes share the per-IP key space: a general class covering
//! every API request, and a stricter class covering upload admission. Idle
//! entries are evicted by a background cleanup task to bound memory.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::{DashMap, mapref::entry::Entry};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
};
use satoshisend_core::config::RateLimitConfig;
use std::{
    net::SocketAddr,
    num::NonZeroU32,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

/// Type alias for the keyed per-IP rate limiter.
type KeyedLimiter =
    RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Minimum evictions before a limiter rebuild is worth the state reset.
const REBUILD_EVICTION_MIN_COUNT: usize = 100;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Option<Arc<RateLimitStateInner>>,
}

struct RateLimitStateInner {
    /// General request class (wrapped for rebuilds during cleanup).
    general: RwLock<KeyedLimiter>,
    /// Upload admission class.
    upload: RwLock<KeyedLimiter>,
    /// Last access per IP, shared by both classes, used for eviction.
    last_access: DashMap<String, Instant>,
    general_quota: Quota,
    upload_quota: Quota,
    max_entries: u32,
    entry_ttl: Duration,
}

impl RateLimitState {
    /// Create rate limit state from configuration. A disabled config yields
    /// a state whose checks always pass.
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self { inner: None };
        }

        let general_quota = Quota::per_second(
            NonZeroU32::new(config.general_requests_per_second)
                .unwrap_or(NonZeroU32::new(10).unwrap()),
        )
        .allow_burst(NonZeroU32::new(config.general_burst).unwrap_or(NonZeroU32::new(1).unwrap()));

        let upload_quota = Quota::per_minute(
            NonZeroU32::new(config.upload_requests_per_minute)
                .unwrap_or(NonZeroU32::new(10).unwrap()),
        )
        .allow_burst(NonZeroU32::new(config.upload_burst).unwrap_or(NonZeroU32::new(1).unwrap()));

        Self {
            inner: Some(Arc::new(RateLimitStateInner {
                general: RwLock::new(RateLimiter::dashmap(general_quota)),
                upload: RwLock::new(RateLimiter::dashmap(upload_quota)),
                last_access: DashMap::new(),
                general_quota,
                upload_quota,
                max_entries: config.max_entries,
                entry_ttl: Duration::from_secs(config.entry_ttl_secs),
            })),
        }
    }

    /// Check the general request class for `ip`.
    pub fn check_general(&self, ip: &str) -> Result<(), RateLimitError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        inner.record_access(ip)?;
        Self::check(&inner.general, ip)
    }

    /// Check the upload admission class for `ip`.
    pub fn check_upload(&self, ip: &str) -> Result<(), RateLimitError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        inner.record_access(ip)?;
        Self::check(&inner.upload, ip)
    }

    fn check(limiter: &RwLock<KeyedLimiter>, ip: &str) -> Result<(), RateLimitError> {
        let limiter = limiter.read().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter RwLock was poisoned, recovering");
            poisoned.into_inner()
        });
        match limiter.check_key(&ip.to_string()) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait =
                    not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                Err(RateLimitError {
                    retry_after_secs: wait.as_secs() + 1,
                })
            }
        }
    }

    /// Whether rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Evict idle entries and rebuild the governor maps when enough were
    /// evicted to justify resetting limiter state. Returns evicted count.
    ///
    /// Governor's internal DashMap does not support key removal, so memory
    /// is reclaimed by rebuilding the limiter from its quota.
    pub fn cleanup(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };

        let now = Instant::now();
        let ttl = inner.entry_ttl;
        let mut evicted = 0;

        let stale: Vec<String> = inner
            .last_access
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for key in stale {
            // Remove only if still stale; a racing request keeps its entry.
            if inner
                .last_access
                .remove_if(&key, |_, last| now.duration_since(*last) > ttl)
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted >= REBUILD_EVICTION_MIN_COUNT {
            Self::rebuild(&inner.general, inner.general_quota);
            Self::rebuild(&inner.upload, inner.upload_quota);
            tracing::debug!(
                evicted,
                remaining = inner.last_access.len(),
                "rebuilt rate limiters after cleanup"
            );
        }

        evicted
    }

    fn rebuild(limiter: &RwLock<KeyedLimiter>, quota: Quota) {
        let mut guard = limiter.write().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter RwLock was poisoned during rebuild, recovering");
            poisoned.into_inner()
        });
        *guard = RateLimiter::dashmap(quota);
    }

    /// Number of tracked IPs.
    pub fn entry_count(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.last_access.len())
    }
}

impl RateLimitStateInner {
    /// Record the access timestamp for an IP, rejecting brand-new IPs once
    /// the tracking table is full (memory exhaustion guard).
    fn record_access(&self, ip: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let at_capacity = self.last_access.len() >= self.max_entries as usize;

        match self.last_access.entry(ip.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(now);
                Ok(())
            }
            Entry::Vacant(entry) => {
                if at_capacity {
                    return Err(RateLimitError {
                        retry_after_secs: 60,
                    });
                }
                entry.insert(now);
                Ok(())
            }
        }
    }
}

/// Error returned when a rate limit is exceeded.
#[derive(Debug)]
pub struct RateLimitError {
    /// Seconds to wait before retrying.
    pub retry_after_secs: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": "rate_limit_exceeded",
            "message": format!("rate limit exceeded, retry after {} seconds", self.retry_after_secs),
            "retry_after": self.retry_after_secs,
        });
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", self.retry_after_secs.to_string())],
            axum::Json(body),
        )
            .into_response()
    }
}

/// Derive the client IP: leftmost `X-Forwarded-For`, then `X-Real-IP`, then
/// the connection peer address.
pub fn client_ip(req: &Request<Body>) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-IP rate limiting middleware. Upload reservations get the stricter
/// upload class; everything else the general class.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !rate_limit.is_enabled() {
        return next.run(req).await;
    }

    let ip = client_ip(&req);
    let is_upload = req.method() == Method::POST && req.uri().path() == "/api/upload/init";
    let result = if is_upload {
        rate_limit.check_upload(&ip)
    } else {
        rate_limit.check_general(&ip)
    };

    match result {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::debug!(ip = %ip, path = %req.uri().path(), "rate limit exceeded");
            e.into_response()
        }
    }
}

/// Spawn a background task that periodically evicts idle limiter entries.
pub fn spawn_cleanup_task(
    state: RateLimitState,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = state.cleanup();
            if evicted > 0 {
                tracing::info!(evicted, "rate limiter cleanup evicted idle entries");
            }
        }
    })
}
