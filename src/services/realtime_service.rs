//! Realtime tree operations: point reads and writes, shallow merges,
//! ordered queries, change subscriptions, and compare-and-swap
//! transactions.

use std::time::Instant;

use serde_json::{Map, Value};

use crate::api::Timed;
use crate::error::ApiError;
use crate::provider::{
    ChangeCallback, ProviderError, RealtimeQuery, SubscriptionGuard, TransactionFn,
};
use crate::state::AppState;

pub struct RealtimeService {
    state: AppState,
}

fn normalize_path(path: &str) -> Result<String, ApiError> {
    let trimmed = path.trim_matches('/');
    if trimmed.split('/').any(|seg| {
        seg.contains('.') || seg.contains('#') || seg.contains('$') || seg.contains('[')
            || seg.contains(']')
    }) {
        return Err(ApiError::validation(
            "Path segments must not contain '.', '#', '$', '[' or ']'",
        ));
    }
    Ok(trimmed.to_string())
}

impl RealtimeService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn get(&self, path: &str) -> Result<Timed<Value>, ApiError> {
        let path = normalize_path(path)?;
        let realtime = self.state.capabilities.realtime().await?;
        let started = Instant::now();
        let value = realtime.get(&path).await?;
        Ok(Timed::new(value, started.elapsed().as_millis() as u64))
    }

    pub async fn set(&self, path: &str, value: Value) -> Result<Timed<()>, ApiError> {
        let path = normalize_path(path)?;
        let realtime = self.state.capabilities.realtime().await?;
        let started = Instant::now();
        realtime.set(&path, value).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(path = %path, elapsed, "realtime node written");
        Ok(Timed::new((), elapsed))
    }

    /// Shallow merge: supplied children overwrite, siblings survive.
    pub async fn merge(
        &self,
        path: &str,
        value: Map<String, Value>,
    ) -> Result<Timed<()>, ApiError> {
        let path = normalize_path(path)?;
        let realtime = self.state.capabilities.realtime().await?;
        let started = Instant::now();
        realtime.update(&path, value).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(path = %path, elapsed, "realtime node merged");
        Ok(Timed::new((), elapsed))
    }

    pub async fn delete(&self, path: &str) -> Result<Timed<()>, ApiError> {
        let path = normalize_path(path)?;
        let realtime = self.state.capabilities.realtime().await?;
        let started = Instant::now();
        realtime.delete(&path).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(path = %path, elapsed, "realtime node deleted");
        Ok(Timed::new((), elapsed))
    }

    pub async fn query(
        &self,
        path: &str,
        query: &RealtimeQuery,
    ) -> Result<Timed<Value>, ApiError> {
        let path = normalize_path(path)?;
        let realtime = self.state.capabilities.realtime().await?;
        let started = Instant::now();
        let value = realtime.query(&path, query).await?;
        Ok(Timed::new(value, started.elapsed().as_millis() as u64))
    }

    /// Register a change callback under `path`. The returned guard stops
    /// delivery when cancelled or dropped; callers own its lifetime.
    pub async fn subscribe(
        &self,
        path: &str,
        callback: ChangeCallback,
    ) -> Result<SubscriptionGuard, ApiError> {
        let path = normalize_path(path)?;
        let realtime = self.state.capabilities.realtime().await?;
        let guard = realtime.subscribe(&path, callback).await?;
        tracing::info!(path = %path, "realtime subscription registered");
        Ok(guard)
    }

    /// Compare-and-swap transaction; the closure sees the current value and
    /// returns the replacement, or `None` to abort. Returns the committed
    /// value.
    pub async fn transaction(
        &self,
        path: &str,
        update: TransactionFn,
    ) -> Result<Timed<Value>, ApiError> {
        let path = normalize_path(path)?;
        let realtime = self.state.capabilities.realtime().await?;
        let started = Instant::now();
        let committed = match realtime.transaction(&path, update).await {
            Ok(value) => value,
            // An aborted compare-and-swap is a client precondition miss
            Err(ProviderError::Conflict(_)) => {
                return Err(ApiError::validation(
                    "Transaction aborted: current value did not match the precondition",
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(path = %path, elapsed, "realtime transaction committed");
        Ok(Timed::new(committed, elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_trimmed_and_validated() {
        assert_eq!(normalize_path("/rooms/lobby/").unwrap(), "rooms/lobby");
        assert_eq!(normalize_path("status").unwrap(), "status");
        assert!(normalize_path("rooms/a.b").is_err());
        assert!(normalize_path("rooms/$priority").is_err());
    }
}
