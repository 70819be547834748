//! Authorization pipeline: bearer extraction, token verification, and the
//! role / permission / ownership gates.
//!
//! Verification attaches an [`AuthContext`] to the request; every gate
//! downstream reads only that attached identity and never re-verifies the
//! token. Each gate either calls through or short-circuits with an error
//! envelope, and logs intent and outcome either way.

use std::time::Instant;

use axum::{
    extract::{RawPathParams, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde_json::Value;

use crate::error::ApiError;
use crate::provider::Identity;
use crate::state::AppState;

use super::validate::ValidatedBody;

/// Verified identity for this request plus how long verification took.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub identity: Identity,
    pub verify_ms: u64,
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

async fn verify(state: &AppState, token: &str) -> Result<AuthContext, ApiError> {
    let auth = state.capabilities.auth().await?;
    let started = Instant::now();
    let identity = auth.verify_token(token, false).await?;
    let verify_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(uid = %identity.uid, verify_ms, "token verified");
    Ok(AuthContext { identity, verify_ms })
}

/// Require a verified bearer token; absence short-circuits with
/// `MISSING_TOKEN`, verification failure with `INVALID_TOKEN`.
pub async fn require_auth(
    state: AppState,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(request.headers()).ok_or_else(|| {
        tracing::info!(path = %request.uri().path(), "auth rejected: no bearer token");
        ApiError::missing_token()
    })?;

    let context = verify(&state, &token).await.map_err(|e| {
        tracing::info!(path = %request.uri().path(), code = e.error_code(), "auth rejected");
        e
    })?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Auth-optional variant: a missing or unverifiable credential leaves the
/// request anonymous instead of rejecting it.
pub async fn optional_auth(
    state: AppState,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token) = extract_bearer(request.headers()) {
        match verify(&state, &token).await {
            Ok(context) => {
                request.extensions_mut().insert(context);
            }
            Err(e) => {
                tracing::debug!(code = e.error_code(), "optional auth: credential ignored");
            }
        }
    }
    Ok(next.run(request).await)
}

fn attached_identity(request: &Request) -> Result<Identity, ApiError> {
    request
        .extensions()
        .get::<AuthContext>()
        .map(|ctx| ctx.identity.clone())
        .ok_or_else(|| ApiError::missing_token())
}

fn claim_values(claims: &serde_json::Map<String, Value>, singular: &str, plural: &str) -> Vec<String> {
    let mut values = Vec::new();
    if let Some(v) = claims.get(singular).and_then(Value::as_str) {
        values.push(v.to_string());
    }
    if let Some(list) = claims.get(plural).and_then(Value::as_array) {
        values.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
    }
    values
}

/// Require membership in one of `roles`, read from the user record's custom
/// claims. The full record is re-fetched so claim changes take effect
/// without waiting for token refresh.
pub async fn require_role(
    state: AppState,
    roles: &'static [&'static str],
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = attached_identity(&request)?;
    let endpoint = request.uri().path().to_string();
    tracing::debug!(uid = %identity.uid, ?roles, endpoint = %endpoint, "role gate: checking");

    let auth = state.capabilities.auth().await?;
    let record = auth.get_user(&identity.uid).await?;
    let held = claim_values(&record.custom_claims, "role", "roles");

    if !held.iter().any(|r| roles.contains(&r.as_str())) {
        tracing::info!(uid = %identity.uid, ?roles, ?held, endpoint = %endpoint, "role gate: denied");
        return Err(ApiError::insufficient_role(format!(
            "Requires one of roles: {}",
            roles.join(", ")
        )));
    }

    tracing::debug!(uid = %identity.uid, endpoint = %endpoint, "role gate: passed");
    Ok(next.run(request).await)
}

/// Require membership in one of `permissions`, read from the claims-carried
/// permission list on the re-fetched user record.
pub async fn require_permission(
    state: AppState,
    permissions: &'static [&'static str],
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = attached_identity(&request)?;
    let endpoint = request.uri().path().to_string();
    tracing::debug!(uid = %identity.uid, ?permissions, endpoint = %endpoint, "permission gate: checking");

    let auth = state.capabilities.auth().await?;
    let record = auth.get_user(&identity.uid).await?;
    let held = claim_values(&record.custom_claims, "permission", "permissions");

    if !held.iter().any(|p| permissions.contains(&p.as_str())) {
        tracing::info!(uid = %identity.uid, ?permissions, endpoint = %endpoint, "permission gate: denied");
        return Err(ApiError::insufficient_permission(format!(
            "Requires one of permissions: {}",
            permissions.join(", ")
        )));
    }

    tracing::debug!(uid = %identity.uid, endpoint = %endpoint, "permission gate: passed");
    Ok(next.run(request).await)
}

/// Compare a caller-supplied owner field (path parameter first, then the
/// validated body) against the verified identity. A missing field is a
/// client error, a mismatch is `OWNERSHIP_REQUIRED`.
pub async fn require_ownership(
    field: &'static str,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = attached_identity(&request)?;

    let from_path = params
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, value)| value.to_string());
    let from_body = request
        .extensions()
        .get::<ValidatedBody>()
        .and_then(|body| body.0.get(field))
        .and_then(Value::as_str)
        .map(str::to_string);

    let owner = from_path.or(from_body).ok_or_else(|| {
        ApiError::validation(format!("Missing resource owner field '{}'", field))
    })?;

    if owner != identity.uid {
        tracing::info!(
            uid = %identity.uid,
            owner = %owner,
            endpoint = %request.uri().path(),
            "ownership gate: denied"
        );
        return Err(ApiError::ownership_required(
            "You can only access your own resources",
        ));
    }

    tracing::debug!(uid = %identity.uid, endpoint = %request.uri().path(), "ownership gate: passed");
    Ok(next.run(request).await)
}
