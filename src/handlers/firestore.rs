//! Document store routes: CRUD, filtered queries, prefix search, batches,
//! and atomic field mutations. All routes require a verified token; the
//! caller's uid is stamped as the write actor.

use axum::{
    extract::{Path, RawPathParams, Request, State},
    middleware::{self, Next},
    routing::{get, post},
    Extension, Router,
};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::api::{ApiResponse, ApiResult, Pagination};
use crate::error::ApiError;
use crate::middleware::auth::{require_auth, AuthContext};
use crate::middleware::rate_limit::enforce_rate_limit;
use crate::middleware::validate::{
    validate_body, validate_params, validate_query, Field, Schema, ValidatedBody,
    ValidatedQuery,
};
use crate::provider::{DocumentQuery, FieldMutation, StoredDocument};
use crate::services::document_service::BatchOp;
use crate::services::DocumentService;
use crate::state::AppState;

static CREATE_DOC: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.create")
        .field(Field::identifier("id"))
        .field(Field::object("data").required())
});

static UPDATE_DOC: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.update")
        .field(Field::object("data").required())
        .field(Field::boolean("merge").default_value(json!(true)))
});

static DELETE_QUERY: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.delete")
        .field(Field::boolean("hard").default_value(json!(false)))
});

static LIST_QUERY: Lazy<Schema> = Lazy::new(|| {
    let mut schema = Schema::new("firestore.list");
    for field in crate::middleware::validate::pagination_fields() {
        schema = schema.field(field);
    }
    schema
});

static QUERY_BODY: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.query")
        .field(Field::array("filters").max_items(100))
        .field(Field::object("order_by"))
        .field(Field::integer("limit").min(1).max(1000))
        .field(Field::integer("offset").min(0))
});

static SEARCH_QUERY: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.search")
        .field(Field::identifier("field").required())
        .field(Field::string("prefix").required().min_len(1).max_len(1024))
        .field(Field::integer("limit").min(1).max(1000))
});

static BATCH_BODY: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.batch")
        .field(Field::identifier("collection").required())
        .field(Field::array("operations").required().max_items(500))
});

static ARRAY_MUTATION: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.array_mutation")
        .field(Field::string("field").required().min_len(1).max_len(256))
        .field(Field::array("values").required().max_items(1000))
});

static INCREMENT: Lazy<Schema> = Lazy::new(|| {
    Schema::new("firestore.increment")
        .field(Field::string("field").required().min_len(1).max_len(256))
        .field(Field::number("by").required())
});

pub fn routes(state: AppState) -> Router<AppState> {
    let rate_state = state.clone();
    let auth_state = state;

    Router::new()
        .route(
            "/collections/:collection/documents",
            post(create_document)
                .get(list_documents)
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&CREATE_DOC, req, next)
                }))
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_query(&LIST_QUERY, req, next)
                })),
        )
        .route(
            "/collections/:collection/documents/:id",
            get(get_document)
                .put(update_document)
                .delete(delete_document)
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&UPDATE_DOC, req, next)
                }))
                .layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_query(&DELETE_QUERY, req, next)
                })),
        )
        .route(
            "/collections/:collection/query",
            post(query_documents).layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&QUERY_BODY, req, next)
                })),
        )
        .route(
            "/collections/:collection/search",
            get(search_documents).layer(middleware::from_fn(|req: Request, next: Next| {
                validate_query(&SEARCH_QUERY, req, next)
            })),
        )
        .route(
            "/collections/:collection/documents/:id/array-union",
            post(array_union).layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&ARRAY_MUTATION, req, next)
                })),
        )
        .route(
            "/collections/:collection/documents/:id/array-remove",
            post(array_remove).layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&ARRAY_MUTATION, req, next)
                })),
        )
        .route(
            "/collections/:collection/documents/:id/increment",
            post(increment).layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&INCREMENT, req, next)
                })),
        )
        .route("/batch", post(apply_batch).layer(middleware::from_fn(|req: Request, next: Next| {
                    validate_body(&BATCH_BODY, req, next)
                })))
        .layer(middleware::from_fn(
            |params: RawPathParams, req: Request, next: Next| {
                validate_params(&["collection", "id"], params, req, next)
            },
        ))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = rate_state.clone();
            async move { enforce_rate_limit(state, req, next).await }
        }))
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let state = auth_state.clone();
            async move { require_auth(state, req, next).await }
        }))
}

async fn create_document(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<StoredDocument> {
    let id = super::opt_str(&body, "id");
    let data = super::body_object(&body, "data")?;
    let timed = DocumentService::new(state)
        .create(&collection, id.as_deref(), data, &ctx.identity.uid)
        .await?;
    let elapsed = timed.elapsed_ms;
    Ok(ApiResponse::created(timed.value).with_timing(elapsed))
}

async fn list_documents(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(ValidatedQuery(query)): Extension<ValidatedQuery>,
) -> ApiResult<Vec<StoredDocument>> {
    let page = super::opt_u32(&query, "page").unwrap_or(1);
    let limit = super::opt_u32(&query, "limit").unwrap_or(20);
    let timed = DocumentService::new(state).list(&collection, page, limit).await?;
    let count = timed.value.len();
    let elapsed = timed.elapsed_ms;
    Ok(ApiResponse::success(timed.value)
        .with_timing(elapsed)
        .paginated(Pagination { page, limit, count, total: None }))
}

async fn get_document(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResult<StoredDocument> {
    let timed = DocumentService::new(state).get(&collection, &id).await?;
    Ok(ApiResponse::timed(timed))
}

async fn update_document(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<StoredDocument> {
    let data = super::body_object(&body, "data")?;
    let merge = super::opt_bool(&body, "merge").unwrap_or(true);
    let timed = DocumentService::new(state)
        .update(&collection, &id, data, merge, &ctx.identity.uid)
        .await?;
    Ok(ApiResponse::timed(timed))
}

async fn delete_document(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedQuery(query)): Extension<ValidatedQuery>,
) -> ApiResult<Value> {
    let hard = super::opt_bool(&query, "hard").unwrap_or(false);
    let service = DocumentService::new(state);
    let timed = if hard {
        service.hard_delete(&collection, &id).await?
    } else {
        service.soft_delete(&collection, &id, &ctx.identity.uid).await?
    };
    Ok(ApiResponse::timed(timed.map(|_| json!({ "id": id, "hard": hard })))
        .with_message(if hard { "Document deleted" } else { "Document soft-deleted" }))
}

async fn query_documents(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<Vec<StoredDocument>> {
    let query: DocumentQuery = serde_json::from_value(Value::Object(body))
        .map_err(|e| ApiError::validation(format!("Invalid query: {}", e)))?;
    let timed = DocumentService::new(state).query(&collection, &query).await?;
    let count = timed.value.len();
    let elapsed = timed.elapsed_ms;
    Ok(ApiResponse::success(timed.value)
        .with_timing(elapsed)
        .paginated(Pagination {
            page: 1,
            limit: query.limit.unwrap_or(count as u32),
            count,
            total: None,
        }))
}

async fn search_documents(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(ValidatedQuery(query)): Extension<ValidatedQuery>,
) -> ApiResult<Vec<StoredDocument>> {
    let field = super::body_str(&query, "field")?.to_string();
    let prefix = super::body_str(&query, "prefix")?.to_string();
    let limit = super::opt_u32(&query, "limit");
    let timed = DocumentService::new(state)
        .search(&collection, &field, &prefix, limit)
        .await?;
    Ok(ApiResponse::timed(timed))
}

async fn array_union(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<StoredDocument> {
    let field = super::body_str(&body, "field")?.to_string();
    let values = body
        .get("values")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let timed = DocumentService::new(state)
        .mutate(
            &collection,
            &id,
            vec![FieldMutation::ArrayUnion { field, values }],
            &ctx.identity.uid,
        )
        .await?;
    Ok(ApiResponse::timed(timed))
}

async fn array_remove(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<StoredDocument> {
    let field = super::body_str(&body, "field")?.to_string();
    let values = body
        .get("values")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let timed = DocumentService::new(state)
        .mutate(
            &collection,
            &id,
            vec![FieldMutation::ArrayRemove { field, values }],
            &ctx.identity.uid,
        )
        .await?;
    Ok(ApiResponse::timed(timed))
}

async fn increment(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<StoredDocument> {
    let field = super::body_str(&body, "field")?.to_string();
    let by = body
        .get("by")
        .and_then(Value::as_f64)
        .ok_or_else(|| ApiError::validation("'by' must be a number"))?;
    let timed = DocumentService::new(state)
        .mutate(
            &collection,
            &id,
            vec![FieldMutation::Increment { field, by }],
            &ctx.identity.uid,
        )
        .await?;
    Ok(ApiResponse::timed(timed))
}

async fn apply_batch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Extension(ValidatedBody(body)): Extension<ValidatedBody>,
) -> ApiResult<Value> {
    let collection = super::body_str(&body, "collection")?.to_string();
    let ops: Vec<BatchOp> = body
        .get("operations")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ApiError::validation(format!("Invalid batch operations: {}", e)))?
        .unwrap_or_default();

    let timed = DocumentService::new(state)
        .batch(&collection, ops, &ctx.identity.uid)
        .await?;
    let elapsed = timed.elapsed_ms;
    let (outcomes, summary) = timed.value;
    Ok(ApiResponse::batch(json!(outcomes), summary).with_timing(elapsed))
}
