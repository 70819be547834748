//! HTTP route glue: one module per surface, assembled into the application
//! router here. Handlers read validated bodies and the attached identity
//! from request extensions; gates and validators are layered per route
//! group at assembly time.

pub mod auth;
pub mod firestore;
pub mod public;
pub mod realtime;
pub mod storage;

use axum::{extract::Request, Router};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(public::routes(state.clone()))
        .nest("/api/firebase/auth", auth::routes(state.clone()))
        .nest("/api/firebase/firestore", firestore::routes(state.clone()))
        .nest("/api/firebase/storage", storage::routes(state.clone()))
        .nest("/api/firebase/realtime", realtime::routes(state.clone()))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found(request: Request) -> ApiError {
    ApiError::not_found(format!(
        "Route {} {} not found",
        request.method(),
        request.uri().path()
    ))
}

/// Read a string the schema guaranteed to be present. A miss here is a
/// wiring bug, not client input.
pub(crate) fn body_str<'a>(
    body: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ApiError> {
    body.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::internal(format!("validated body missing '{}'", key)))
}

pub(crate) fn body_object(
    body: &Map<String, Value>,
    key: &str,
) -> Result<Map<String, Value>, ApiError> {
    body.get(key)
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| ApiError::internal(format!("validated body missing '{}'", key)))
}

pub(crate) fn opt_str(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn opt_bool(body: &Map<String, Value>, key: &str) -> Option<bool> {
    body.get(key).and_then(Value::as_bool)
}

pub(crate) fn opt_u32(body: &Map<String, Value>, key: &str) -> Option<u32> {
    body.get(key).and_then(Value::as_u64).map(|n| n as u32)
}
