//! Sliding-window rate limiting, keyed per caller.
//!
//! One shared [`RateLimiter`] lives in application state. Each key holds a
//! queue of request instants; a request is admitted when fewer than
//! `max_requests` instants remain inside the window after expired ones are
//! dropped. Stale keys are evicted lazily on their own next touch plus an
//! opportunistic sweep so abandoned callers do not accumulate.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::state::AppState;

use super::auth::AuthContext;

// Full-map sweep cadence, counted in admissions
const SWEEP_EVERY: u64 = 64;

pub struct RateLimiter {
    enabled: bool,
    max_requests: usize,
    window: Duration,
    inner: Mutex<Windows>,
}

struct Windows {
    by_key: HashMap<String, VecDeque<Instant>>,
    checks: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_requests: config.max_requests as usize,
            window: Duration::from_secs(config.window_secs),
            inner: Mutex::new(Windows {
                by_key: HashMap::new(),
                checks: 0,
            }),
        }
    }

    /// Admit or reject one request for `key`. On rejection returns the
    /// whole seconds until the oldest counted request leaves the window,
    /// always at least one.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }

        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        inner.checks = inner.checks.wrapping_add(1);
        if inner.checks % SWEEP_EVERY == 0 {
            let window = self.window;
            inner.by_key.retain(|_, q| {
                q.back().is_some_and(|last| now.duration_since(*last) < window)
            });
        }

        let queue = inner.by_key.entry(key.to_string()).or_default();
        while queue
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            queue.pop_front();
        }

        if queue.len() < self.max_requests {
            queue.push_back(now);
            return Ok(());
        }

        let oldest = queue.front().copied().unwrap_or(now);
        let elapsed = now.duration_since(oldest);
        let remaining = self.window.saturating_sub(elapsed);
        Err(remaining.as_secs().max(1))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Middleware: count this request against the caller's window. Verified
/// callers are keyed by uid so a shared NAT address does not pool their
/// budgets; anonymous callers fall back to the peer IP.
pub async fn enforce_rate_limit(
    state: AppState,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| format!("uid:{}", ctx.identity.uid))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| format!("ip:{}", info.0.ip()))
        })
        .unwrap_or_else(|| "anonymous".to_string());

    if let Err(retry_after) = state.rate_limiter.check(&key) {
        tracing::info!(key = %key, retry_after, path = %request.uri().path(), "rate limit exceeded");
        return Err(ApiError::rate_limited(retry_after));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            max_requests: max,
            window_secs,
        })
    }

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let limiter = limiter(3, 60);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        let retry = limiter.check("a").unwrap_err();
        assert!(retry >= 1 && retry <= 60);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1, 60);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("a").is_err());
        assert!(limiter.check("b").is_err());
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            max_requests: 0,
            window_secs: 60,
        });
        for _ in 0..100 {
            assert!(limiter.check("a").is_ok());
        }
    }

    #[test]
    fn expired_entries_free_the_window() {
        let limiter = limiter(2, 0); // zero-length window: everything expires
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
    }

    #[test]
    fn sweep_drops_abandoned_keys() {
        let limiter = limiter(10, 0);
        limiter.check("stale").unwrap();
        for i in 0..SWEEP_EVERY {
            limiter.check(&format!("k{}", i)).unwrap();
        }
        let inner = limiter.inner.lock().unwrap();
        assert!(!inner.by_key.contains_key("stale"));
    }
}
