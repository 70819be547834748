//! Unauthenticated surface: service metadata and the credential
//! configuration report.

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    routing::get,
    Router,
};
use serde_json::{json, Value};

use crate::api::{ApiResponse, ApiResult};
use crate::config::ProviderBackend;
use crate::middleware::auth::optional_auth;
use crate::middleware::rate_limit::enforce_rate_limit;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let rate_state = state.clone();
    let auth_state = state;
    Router::new()
        .route("/", get(root))
        .route("/api", get(api_metadata))
        .route("/api/firebase/info", get(provider_info))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = rate_state.clone();
            async move { enforce_rate_limit(state, req, next).await }
        }))
        // Anonymous access is fine here, but an authenticated caller's rate
        // budget should key on their uid rather than the shared peer IP.
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = auth_state.clone();
            async move { optional_auth(state, req, next).await }
        }))
}

async fn root() -> ApiResult<Value> {
    Ok(ApiResponse::success(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    })))
}

async fn api_metadata() -> ApiResult<Value> {
    Ok(ApiResponse::success(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "surfaces": {
            "auth": "/api/firebase/auth",
            "firestore": "/api/firebase/firestore",
            "storage": "/api/firebase/storage",
            "realtime": "/api/firebase/realtime",
        },
        "info": "/api/firebase/info",
    })))
}

/// Reports which credential material is present, never the material itself.
async fn provider_info(State(state): State<AppState>) -> ApiResult<Value> {
    let provider = &state.config.provider;
    let backend = match provider.backend {
        ProviderBackend::Firebase => "firebase",
        ProviderBackend::Memory => "memory",
    };
    let credential_source = if provider.credentials_file.is_some() {
        "file"
    } else if provider.private_key.is_some() && provider.client_email.is_some() {
        "inline"
    } else if std::env::var("GOOGLE_APPLICATION_CREDENTIALS").is_ok() {
        "ambient"
    } else {
        "none"
    };

    Ok(ApiResponse::success(json!({
        "backend": backend,
        "configured": provider.is_configured(),
        "projectId": provider.project_id,
        "credentialSource": credential_source,
        "databaseUrl": provider.database_url.is_some(),
        "storageBucket": provider.storage_bucket_or_default(),
        "environment": if state.config.is_development() { "development" } else { "production" },
    })))
}
