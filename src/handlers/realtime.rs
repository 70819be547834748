//! Realtime tree routes: point reads and writes, shallow merges, ordered
//! queries, and compare-and-swap transactions over HTTP. Change
//! subscriptions are a service-level capability, not an HTTP surface.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    middleware::{self, Next},
    routing::{get, post},
    Router,
};
use serde_json::{json, Map, Value};

use crate::api::{ApiResponse, ApiResult};
use crate::error::ApiError;
use crate::middleware::auth::require_auth;
use crate::middleware::rate_limit::enforce_rate_limit;
use crate::middleware::sanitize::sanitize_value;
use crate::provider::RealtimeQuery;
use crate::services::RealtimeService;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let rate_state = state.clone();
    let auth_state = state;

    Router::new()
        .route(
            "/data/*path",
            get(get_node).put(set_node).patch(merge_node).delete(delete_node),
        )
        .route("/query/*path", post(query_node))
        .route("/transaction/*path", post(run_transaction))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = rate_state.clone();
            async move { enforce_rate_limit(state, req, next).await }
        }))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = auth_state.clone();
            async move { require_auth(state, req, next).await }
        }))
}

/// Free-form JSON bodies are parsed by hand so malformed input still gets
/// the error envelope.
fn parse_json(bytes: &Bytes) -> Result<Value, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::validation("Request body must be JSON"));
    }
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ApiError::validation(format!("Invalid JSON body: {}", e)))?;
    Ok(sanitize_value(value))
}

async fn get_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Value> {
    let timed = RealtimeService::new(state).get(&path).await?;
    Ok(ApiResponse::timed(timed))
}

async fn set_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
    bytes: Bytes,
) -> ApiResult<Value> {
    let value = parse_json(&bytes)?;
    let timed = RealtimeService::new(state).set(&path, value.clone()).await?;
    Ok(ApiResponse::timed(timed.map(|_| value)))
}

async fn merge_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
    bytes: Bytes,
) -> ApiResult<Value> {
    let value = parse_json(&bytes)?;
    let children: Map<String, Value> = match value {
        Value::Object(map) => map,
        _ => return Err(ApiError::validation("Merge body must be a JSON object")),
    };
    let timed = RealtimeService::new(state).merge(&path, children.clone()).await?;
    Ok(ApiResponse::timed(timed.map(|_| Value::Object(children))))
}

async fn delete_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Value> {
    let timed = RealtimeService::new(state).delete(&path).await?;
    Ok(ApiResponse::timed(timed.map(|_| json!({ "path": path })))
        .with_message("Node deleted"))
}

async fn query_node(
    State(state): State<AppState>,
    Path(path): Path<String>,
    bytes: Bytes,
) -> ApiResult<Value> {
    let body = if bytes.is_empty() { json!({}) } else { parse_json(&bytes)? };
    let query: RealtimeQuery = serde_json::from_value(body)
        .map_err(|e| ApiError::validation(format!("Invalid query: {}", e)))?;
    let timed = RealtimeService::new(state).query(&path, &query).await?;
    Ok(ApiResponse::timed(timed))
}

/// Compare-and-swap over HTTP. The body is either `{"increment": n}` or
/// `{"value": ..., "expected": ...}`; when `expected` is present the write
/// only lands if the current value matches.
async fn run_transaction(
    State(state): State<AppState>,
    Path(path): Path<String>,
    bytes: Bytes,
) -> ApiResult<Value> {
    let body = parse_json(&bytes)?;
    let body = body
        .as_object()
        .ok_or_else(|| ApiError::validation("Transaction body must be a JSON object"))?
        .clone();

    let update: crate::provider::TransactionFn =
        if let Some(by) = body.get("increment").and_then(Value::as_f64) {
            Arc::new(move |current: Value| {
                let n = current.as_f64().unwrap_or(0.0);
                Some(json!(n + by))
            })
        } else if let Some(value) = body.get("value").cloned() {
            let expected = body.get("expected").cloned();
            Arc::new(move |current: Value| match &expected {
                Some(e) if *e != current => None,
                _ => Some(value.clone()),
            })
        } else {
            return Err(ApiError::validation(
                "Transaction body must contain 'increment' or 'value'",
            ));
        };

    let timed = RealtimeService::new(state).transaction(&path, update).await?;
    Ok(ApiResponse::timed(timed))
}
