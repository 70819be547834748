//! Blob storage routes: upload, download, metadata, signed URLs, listing,
//! and a user-scoped area guarded by the ownership gate.

use axum::{
    body::Bytes,
    extract::{Path, RawPathParams, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Router,
};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::api::{ApiResponse, ApiResult};
use crate::error::ApiError;
use crate::middleware::auth::{require_auth, require_ownership};
use crate::middleware::rate_limit::enforce_rate_limit;
use crate::middleware::validate::{validate_query, Field, Schema, ValidatedQuery};
use crate::provider::BlobMetadata;
use crate::services::BlobService;
use crate::state::AppState;

static UPLOAD_QUERY: Lazy<Schema> = Lazy::new(|| {
    Schema::new("storage.upload")
        .field(Field::string("path").required().min_len(1).max_len(1024))
});

static SIGNED_URL_QUERY: Lazy<Schema> = Lazy::new(|| {
    Schema::new("storage.signed_url")
        .field(Field::integer("expires").min(1).default_value(json!(3600)))
});

static LIST_QUERY: Lazy<Schema> = Lazy::new(|| {
    Schema::new("storage.list")
        .field(Field::string("prefix").max_len(1024).default_value(json!("")))
        .field(Field::integer("max").min(1).max(1000).default_value(json!(100)))
});

pub fn routes(state: AppState) -> Router<AppState> {
    let rate_state = state.clone();
    let auth_state = state;

    let shared = Router::new()
        .route(
            "/upload",
            post(upload).layer(middleware::from_fn(|req: Request, next: Next| {
                validate_query(&UPLOAD_QUERY, req, next)
            })),
        )
        .route("/files/*path", get(download).delete(remove))
        .route("/metadata/*path", get(metadata))
        .route(
            "/signed-url/*path",
            get(signed_url).layer(middleware::from_fn(|req: Request, next: Next| {
                validate_query(&SIGNED_URL_QUERY, req, next)
            })),
        )
        .route(
            "/list",
            get(list).layer(middleware::from_fn(|req: Request, next: Next| {
                validate_query(&LIST_QUERY, req, next)
            })),
        );

    // Per-user area: the uid in the path must match the verified identity
    let user_scoped = Router::new()
        .route(
            "/users/:uid/files/*path",
            put(user_upload).get(user_download).delete(user_remove),
        )
        .layer(middleware::from_fn(
            |params: RawPathParams, req: Request, next: Next| {
                require_ownership("uid", params, req, next)
            },
        ));

    Router::new()
        .merge(shared)
        .merge(user_scoped)
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = rate_state.clone();
            async move { enforce_rate_limit(state, req, next).await }
        }))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = auth_state.clone();
            async move { require_auth(state, req, next).await }
        }))
}

fn content_type_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn upload(
    State(state): State<AppState>,
    Extension(ValidatedQuery(query)): Extension<ValidatedQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Value> {
    let path = super::body_str(&query, "path")?.to_string();
    let content_type = content_type_of(&headers);
    let timed = BlobService::new(state)
        .upload(&path, body.to_vec(), content_type.as_deref())
        .await?;
    let elapsed = timed.elapsed_ms;
    let (metadata, stats) = timed.value;
    Ok(ApiResponse::created(json!({ "file": metadata, "transfer": stats }))
        .with_timing(elapsed))
}

async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let timed = BlobService::new(state).download(&path).await?;
    let (bytes, metadata) = timed.value;
    let content_type = metadata
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    Ok(([(CONTENT_TYPE, content_type)], bytes))
}

async fn metadata(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<BlobMetadata> {
    let timed = BlobService::new(state).metadata(&path).await?;
    Ok(ApiResponse::timed(timed))
}

async fn signed_url(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Extension(ValidatedQuery(query)): Extension<ValidatedQuery>,
) -> ApiResult<Value> {
    let expires = super::opt_u32(&query, "expires").unwrap_or(3600) as u64;
    let timed = BlobService::new(state).signed_read_url(&path, expires).await?;
    let timed = timed.map(|url| json!({ "url": url, "expiresInSecs": expires }));
    Ok(ApiResponse::timed(timed))
}

async fn remove(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Value> {
    let timed = BlobService::new(state).delete(&path).await?;
    Ok(ApiResponse::timed(timed.map(|_| json!({ "path": path })))
        .with_message("File deleted"))
}

async fn list(
    State(state): State<AppState>,
    Extension(ValidatedQuery(query)): Extension<ValidatedQuery>,
) -> ApiResult<Vec<BlobMetadata>> {
    let prefix = super::opt_str(&query, "prefix").unwrap_or_default();
    let max = super::opt_u32(&query, "max").unwrap_or(100);
    let timed = BlobService::new(state).list(&prefix, max).await?;
    Ok(ApiResponse::timed(timed))
}

fn user_path(uid: &str, path: &str) -> String {
    format!("users/{}/{}", uid, path)
}

async fn user_upload(
    State(state): State<AppState>,
    Path((uid, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Value> {
    let content_type = content_type_of(&headers);
    let timed = BlobService::new(state)
        .upload(&user_path(&uid, &path), body.to_vec(), content_type.as_deref())
        .await?;
    let elapsed = timed.elapsed_ms;
    let (metadata, stats) = timed.value;
    Ok(ApiResponse::created(json!({ "file": metadata, "transfer": stats }))
        .with_timing(elapsed))
}

async fn user_download(
    State(state): State<AppState>,
    Path((uid, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let timed = BlobService::new(state).download(&user_path(&uid, &path)).await?;
    let (bytes, metadata) = timed.value;
    let content_type = metadata
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    Ok(([(CONTENT_TYPE, content_type)], bytes))
}

async fn user_remove(
    State(state): State<AppState>,
    Path((uid, path)): Path<(String, String)>,
) -> ApiResult<Value> {
    let timed = BlobService::new(state).delete(&user_path(&uid, &path)).await?;
    Ok(ApiResponse::timed(timed.map(|_| json!({ "path": user_path(&uid, &path) })))
        .with_message("File deleted"))
}
