use std::sync::Arc;

use crate::config::AppConfig;
use crate::middleware::rate_limit::RateLimiter;
use crate::provider::CapabilityRegistry;

/// Process-wide services, constructed once at startup and injected into
/// handlers and middleware through axum state. Nothing here is a hidden
/// global; tests can build an `AppState` around fake configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let capabilities = Arc::new(CapabilityRegistry::new(config.provider.clone()));
        Self {
            config: Arc::new(config),
            capabilities,
            rate_limiter,
        }
    }
}
