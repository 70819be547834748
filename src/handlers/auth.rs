//! Identity routes: token exchange, the self-service profile, and the
//! admin user-management surface.

use axum::{
    extract::{Path, RawPathParams, Request, State},
    middleware::{self, Next},
    routing::{get, post, put},
    Extension, Router,
};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::api::{ApiResponse, ApiResult};
use crate::middleware::auth::{require_auth, require_permission, require_role, AuthContext};
use crate::middleware::rate_limit::enforce_rate_limit;
use crate::middleware::validate::{
    validate_body, validate_params, validate_query, Field, Schema, ValidatedBody,
    ValidatedQuery,
};
use crate::provider::{Identity, NewUser, UserPage, UserRecord, UserUpdate};
use crate::services::AuthService;
use crate::state::AppState;

const ADMIN_ROLES: &[&str] = &["admin"];
/// Claims and revocation rewrite another user's security posture, so the
/// admin role alone is not enough.
const USER_ADMIN_PERMISSIONS: &[&str] = &["users:manage"];

static VERIFY_TOKEN: Lazy<Schema> = Lazy::new(|| {
    Schema::new("auth.verify_token")
        .field(Field::string("idToken").required().min_len(1).max_len(4096))
        .field(Field::boolean("checkRevoked").default_value(json!(false)))
});

static CUSTOM_TOKEN: Lazy<Schema> = Lazy::new(|| {
    Schema::new("auth.custom_token")
        .field(Field::identifier("uid").required())
        .field(Field::object("additionalClaims"))
});

static UPDATE_PROFILE: Lazy<Schema> = Lazy::new(|| {
    Schema::new("auth.update_profile")
        .field(Field::email("email"))
        .field(Field::string("displayName").max_len(256))
});

static CREATE_USER: Lazy<Schema> = Lazy::new(|| {
    Schema::new("auth.create_user")
        .field(Field::identifier("uid"))
        .field(Field::email("email"))
        .field(Field::string("password").min_len(6).max_len(1024))
        .field(Field::string("displayName").max_len(256))
});

static UPDATE_USER: Lazy<Schema> = Lazy::new(|| {
    Schema::new("auth.update_user")
        .field(Field::email("email"))
        .field(Field::string("displayName").max_len(256))
        .field(Field::boolean("disabled"))
});

static SET_CLAIMS: Lazy<Schema> = Lazy::new(|| {
    Schema::new("auth.set_claims").field(Field::object("claims").required())
});

static LIST_USERS: Lazy<Schema> = Lazy::new(|| {
    Schema::new("auth.list_users")
        .field(Field::integer("limit").min(1).max(1000).default_value(json!(100)))
        .field(Field::string("pageToken").max_len(512))
});

pub fn routes(state: AppState) -> Router<AppState> {
    let rate = |state: AppState| {
        middleware::from_fn(move |req: Request, next: Next| {
            let state = state.clone();
            async move { enforce_rate_limit(state, req, next).await }
        })
    };
    let authed = |state: AppState| {
        middleware::from_fn(move |req: Request, next: Next| {
            let state = state.clone();
            async move { require_auth(state, req, next).await }
        })
    };
    let permitted = |state: AppState| {
        middleware::from_fn(move |req: Request, next: Next| {
            let state = state.clone();
            async move { require_permission(state, USER_ADMIN_PERMISSIONS, req, next).await }
        })
    };

    // Token exchange needs no prior credential
    let tokens = Router::new()
        .route(
            "/verify-token",
            post(verify_token).layer(middleware::from_fn(|req: Request, next: Next| {
                validate_body(&VERIFY_TOKEN, req, next)
            })),
        )
        .route(
            "/custom-token",
            post(custom_token).layer(middleware::from_fn(|req: Request, next: Next| {
                validate_body(&CUSTOM_TOKEN, req, next)
            })),
        )
        .layer(rate(state.clone()));

    let profile = Router::new()
        .route(
            "/profile",
            get(get_profile)
                .put(update_profile)
                .delete(delete_profile)
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&UPDATE_PROFILE, req, next)
                })),
        )
        .layer(rate(state.clone()))
        .layer(authed(state.clone()));

    let admin_state = state.clone();
    let admin = Router::new()
        .route(
            "/admin/users",
            post(create_user)
                .get(list_users)
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&CREATE_USER, req, next)
                }))
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_query(&LIST_USERS, req, next)
                })),
        )
        .route(
            "/admin/users/:uid",
            get(get_user)
                .put(update_user)
                .delete(delete_user)
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&UPDATE_USER, req, next)
                })),
        )
        .route(
            "/admin/users/:uid/claims",
            put(set_claims)
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&SET_CLAIMS, req, next)
                }))
                .layer(permitted(state.clone())),
        )
        .route(
            "/admin/users/:uid/revoke",
            post(revoke_tokens).layer(permitted(state.clone())),
        )
        .layer(middleware::from_fn(
            |params: RawPathParams, req: Request, next: Next| {
                validate_params(&["uid"], params, req, next)
            },
        ))
        .layer(rate(state.clone()))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = admin_state.clone();
            async move { require_role(state, ADMIN_ROLES, req, next).await }
        }))
        .layer(authed(state));

    Router::new().merge(tokens).merge(profile).merge(admin)
}

async fn verify_token(
    State(state): State<AppState>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<Identity> {
    let token = super::body_str(&body, "idToken")?;
    let check_revoked = super::opt_bool(&body, "checkRevoked").unwrap_or(false);
    let timed = AuthService::new(state).verify_token(token, check_revoked).await?;
    Ok(ApiResponse::timed(timed))
}

async fn custom_token(
    State(state): State<AppState>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<Value> {
    let uid = super::body_str(&body, "uid")?;
    let claims = body.get("additionalClaims").and_then(Value::as_object).cloned();
    let timed = AuthService::new(state)
        .create_custom_token(uid, claims)
        .await?
        .map(|token| json!({ "token": token }));
    Ok(ApiResponse::timed(timed))
}

async fn get_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<UserRecord> {
    let timed = AuthService::new(state).get_user(&ctx.identity.uid).await?;
    Ok(ApiResponse::timed(timed))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<UserRecord> {
    let update = UserUpdate {
        email: super::opt_str(&body, "email"),
        display_name: super::opt_str(&body, "displayName"),
        disabled: None,
    };
    let timed = AuthService::new(state).update_user(&ctx.identity.uid, update).await?;
    Ok(ApiResponse::timed(timed))
}

async fn delete_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Value> {
    let timed = AuthService::new(state).delete_user(&ctx.identity.uid).await?;
    Ok(ApiResponse::timed(timed.map(|_| json!({ "uid": ctx.identity.uid })))
        .with_message("Account deleted"))
}

async fn create_user(
    State(state): State<AppState>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<UserRecord> {
    let user = NewUser {
        uid: super::opt_str(&body, "uid"),
        email: super::opt_str(&body, "email"),
        password: super::opt_str(&body, "password"),
        display_name: super::opt_str(&body, "displayName"),
    };
    let timed = AuthService::new(state).create_user(user).await?;
    let elapsed = timed.elapsed_ms;
    Ok(ApiResponse::created(timed.value).with_timing(elapsed))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(ValidatedQuery(query)): Extension<ValidatedQuery>,
) -> ApiResult<UserPage> {
    let limit = super::opt_u32(&query, "limit").unwrap_or(100);
    let page_token = super::opt_str(&query, "pageToken");
    let timed = AuthService::new(state)
        .list_users(limit, page_token.as_deref())
        .await?;
    Ok(ApiResponse::timed(timed))
}

async fn get_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<UserRecord> {
    let timed = AuthService::new(state).get_user(&uid).await?;
    Ok(ApiResponse::timed(timed))
}

async fn update_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<UserRecord> {
    let update = UserUpdate {
        email: super::opt_str(&body, "email"),
        display_name: super::opt_str(&body, "displayName"),
        disabled: super::opt_bool(&body, "disabled"),
    };
    let timed = AuthService::new(state).update_user(&uid, update).await?;
    Ok(ApiResponse::timed(timed))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Value> {
    let timed = AuthService::new(state).delete_user(&uid).await?;
    Ok(ApiResponse::timed(timed.map(|_| json!({ "uid": uid }))).with_message("User deleted"))
}

async fn set_claims(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<Value> {
    let claims = super::body_object(&body, "claims")?;
    let timed = AuthService::new(state).set_custom_claims(&uid, claims).await?;
    Ok(ApiResponse::timed(timed.map(|_| json!({ "uid": uid })))
        .with_message("Custom claims replaced"))
}

async fn revoke_tokens(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Value> {
    let timed = AuthService::new(state).revoke_tokens(&uid).await?;
    Ok(ApiResponse::timed(timed.map(|_| json!({ "uid": uid })))
        .with_message("Tokens revoked"))
}
