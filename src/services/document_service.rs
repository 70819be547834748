//! Document operations over the backing document store.
//!
//! The service owns the system fields: `createdAt` / `createdBy` on create,
//! `updatedAt` / `updatedBy` on every write, and the soft-delete markers
//! `deleted` / `deletedAt`. A document with no `deleted` flag is live;
//! soft-deleted documents stay in storage but read as absent.

use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::{BatchSummary, Timed};
use crate::error::ApiError;
use crate::provider::{
    DocumentQuery, FieldFilter, FieldMutation, FilterOp, StoredDocument,
};
use crate::state::AppState;

const MAX_BATCH_OPS: usize = 500;

/// One operation inside a batch request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    Create {
        id: Option<String>,
        data: Map<String, Value>,
    },
    Update {
        id: String,
        data: Map<String, Value>,
    },
    Delete {
        id: String,
    },
}

/// Per-operation outcome inside a batch response.
#[derive(Debug, serde::Serialize)]
pub struct BatchOutcome {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct DocumentService {
    state: AppState,
}

fn is_soft_deleted(doc: &StoredDocument) -> bool {
    doc.data.get("deleted").and_then(Value::as_bool).unwrap_or(false)
}

fn now_stamp() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

impl DocumentService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        mut data: Map<String, Value>,
        actor: &str,
    ) -> Result<Timed<StoredDocument>, ApiError> {
        let store = self.state.capabilities.documents().await?;
        let stamp = now_stamp();
        data.insert("createdAt".into(), stamp.clone());
        data.insert("updatedAt".into(), stamp);
        data.insert("createdBy".into(), json!(actor));
        data.insert("updatedBy".into(), json!(actor));

        let started = Instant::now();
        let doc = store.create(collection, id, data).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(collection, id = %doc.id, elapsed, "document created");
        Ok(Timed::new(doc, elapsed))
    }

    /// Fetch one live document; soft-deleted documents read as absent.
    pub async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Timed<StoredDocument>, ApiError> {
        let store = self.state.capabilities.documents().await?;
        let started = Instant::now();
        let doc = store.get(collection, id).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        if is_soft_deleted(&doc) {
            return Err(ApiError::not_found(format!(
                "Document '{}/{}' not found",
                collection, id
            )));
        }
        Ok(Timed::new(doc, elapsed))
    }

    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        mut data: Map<String, Value>,
        merge: bool,
        actor: &str,
    ) -> Result<Timed<StoredDocument>, ApiError> {
        let store = self.state.capabilities.documents().await?;

        // Updating a soft-deleted document would silently resurrect it
        let current = store.get(collection, id).await?;
        if is_soft_deleted(&current) {
            return Err(ApiError::not_found(format!(
                "Document '{}/{}' not found",
                collection, id
            )));
        }

        data.insert("updatedAt".into(), now_stamp());
        data.insert("updatedBy".into(), json!(actor));
        if !merge {
            // Replacement keeps provenance
            if let Some(created_at) = current.data.get("createdAt") {
                data.insert("createdAt".into(), created_at.clone());
            }
            if let Some(created_by) = current.data.get("createdBy") {
                data.insert("createdBy".into(), created_by.clone());
            }
        }

        let started = Instant::now();
        let doc = store.update(collection, id, data, merge).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(collection, id, merge, elapsed, "document updated");
        Ok(Timed::new(doc, elapsed))
    }

    /// Soft delete: mark the document as deleted and keep it in storage.
    pub async fn soft_delete(
        &self,
        collection: &str,
        id: &str,
        actor: &str,
    ) -> Result<Timed<()>, ApiError> {
        let store = self.state.capabilities.documents().await?;
        let current = store.get(collection, id).await?;
        if is_soft_deleted(&current) {
            return Err(ApiError::not_found(format!(
                "Document '{}/{}' not found",
                collection, id
            )));
        }

        let mut marker = Map::new();
        marker.insert("deleted".into(), json!(true));
        marker.insert("deletedAt".into(), now_stamp());
        marker.insert("updatedAt".into(), now_stamp());
        marker.insert("updatedBy".into(), json!(actor));

        let started = Instant::now();
        store.update(collection, id, marker, true).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(collection, id, elapsed, "document soft-deleted");
        Ok(Timed::new((), elapsed))
    }

    /// Hard delete: remove the document entirely. Deleting what is already
    /// gone is a 404, so repeated deletes are not silently idempotent.
    pub async fn hard_delete(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Timed<()>, ApiError> {
        let store = self.state.capabilities.documents().await?;
        store.get(collection, id).await?;

        let started = Instant::now();
        store.delete(collection, id).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(collection, id, elapsed, "document hard-deleted");
        Ok(Timed::new((), elapsed))
    }

    /// Paged listing of live documents. Deleted documents are filtered
    /// after the fetch, so a page may come back short.
    pub async fn list(
        &self,
        collection: &str,
        page: u32,
        limit: u32,
    ) -> Result<Timed<Vec<StoredDocument>>, ApiError> {
        let query = DocumentQuery {
            filters: Vec::new(),
            order_by: None,
            limit: Some(limit),
            offset: Some(page.saturating_sub(1).saturating_mul(limit)),
        };
        self.run_query(collection, &query).await
    }

    pub async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Timed<Vec<StoredDocument>>, ApiError> {
        self.run_query(collection, query).await
    }

    /// Prefix search on one string field, expressed as a range scan:
    /// `field >= prefix && field < prefix + U+F8FF`.
    pub async fn search(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
        limit: Option<u32>,
    ) -> Result<Timed<Vec<StoredDocument>>, ApiError> {
        let upper = format!("{}\u{f8ff}", prefix);
        let query = DocumentQuery {
            filters: vec![
                FieldFilter {
                    field: field.to_string(),
                    op: FilterOp::Gte,
                    value: json!(prefix),
                },
                FieldFilter {
                    field: field.to_string(),
                    op: FilterOp::Lt,
                    value: json!(upper),
                },
            ],
            order_by: None,
            limit,
            offset: None,
        };
        self.run_query(collection, &query).await
    }

    async fn run_query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Timed<Vec<StoredDocument>>, ApiError> {
        let store = self.state.capabilities.documents().await?;
        let started = Instant::now();
        let docs = store.query(collection, query).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        let live: Vec<StoredDocument> =
            docs.into_iter().filter(|d| !is_soft_deleted(d)).collect();
        tracing::debug!(collection, count = live.len(), elapsed, "query executed");
        Ok(Timed::new(live, elapsed))
    }

    /// Atomic field mutations on one document: array union/remove and
    /// numeric increment. The write stamp rides along.
    pub async fn mutate(
        &self,
        collection: &str,
        id: &str,
        mut mutations: Vec<FieldMutation>,
        actor: &str,
    ) -> Result<Timed<StoredDocument>, ApiError> {
        let store = self.state.capabilities.documents().await?;
        let current = store.get(collection, id).await?;
        if is_soft_deleted(&current) {
            return Err(ApiError::not_found(format!(
                "Document '{}/{}' not found",
                collection, id
            )));
        }

        mutations.retain(|m| !matches!(m, FieldMutation::Increment { by, .. } if *by == 0.0));
        // The write stamp rides in the same commit as the transforms
        mutations.push(FieldMutation::Set { field: "updatedAt".into(), value: now_stamp() });
        mutations.push(FieldMutation::Set { field: "updatedBy".into(), value: json!(actor) });

        let started = Instant::now();
        let doc = store.mutate(collection, id, mutations).await?;
        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(collection, id, elapsed, "document mutated");
        Ok(Timed::new(doc, elapsed))
    }

    /// Apply up to [`MAX_BATCH_OPS`] operations one by one, reporting each
    /// outcome. A failed operation never aborts the rest.
    pub async fn batch(
        &self,
        collection: &str,
        ops: Vec<BatchOp>,
        actor: &str,
    ) -> Result<Timed<(Vec<BatchOutcome>, BatchSummary)>, ApiError> {
        if ops.is_empty() {
            return Err(ApiError::validation("Batch must contain at least one operation"));
        }
        if ops.len() > MAX_BATCH_OPS {
            return Err(ApiError::validation(format!(
                "Batch exceeds the maximum of {} operations",
                MAX_BATCH_OPS
            )));
        }

        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(ops.len());
        let mut successful = 0usize;

        for (index, op) in ops.into_iter().enumerate() {
            let result = match op {
                BatchOp::Create { id, data } => self
                    .create(collection, id.as_deref(), data, actor)
                    .await
                    .map(|t| Some(t.value.id)),
                BatchOp::Update { id, data } => self
                    .update(collection, &id, data, true, actor)
                    .await
                    .map(|t| Some(t.value.id)),
                BatchOp::Delete { id } => self
                    .soft_delete(collection, &id, actor)
                    .await
                    .map(|_| Some(id)),
            };

            match result {
                Ok(id) => {
                    successful += 1;
                    outcomes.push(BatchOutcome { index, success: true, id, error: None });
                }
                Err(e) => {
                    outcomes.push(BatchOutcome {
                        index,
                        success: false,
                        id: None,
                        error: Some(e.client_message()),
                    });
                }
            }
        }

        let elapsed = started.elapsed().as_millis() as u64;
        let summary = BatchSummary {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
        };
        tracing::info!(
            collection,
            total = summary.total,
            failed = summary.failed,
            elapsed,
            "batch applied"
        );
        Ok(Timed::new((outcomes, summary), elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AppConfig, Environment, ProviderBackend, ProviderConfig, RateLimitConfig, ServerConfig,
    };

    fn memory_state() -> AppState {
        AppState::new(AppConfig {
            environment: Environment::Development,
            server: ServerConfig { port: 0, cors_origin: None },
            provider: ProviderConfig {
                backend: ProviderBackend::Memory,
                project_id: None,
                private_key: None,
                client_email: None,
                credentials_file: None,
                database_url: None,
                storage_bucket: None,
            },
            rate_limit: RateLimitConfig { enabled: false, max_requests: 100, window_secs: 60 },
        })
    }

    #[tokio::test]
    async fn list_far_past_the_data_is_empty_not_a_panic() {
        let service = DocumentService::new(memory_state());
        let mut data = Map::new();
        data.insert("title".into(), json!("only"));
        service.create("articles", Some("a1"), data, "tester").await.unwrap();

        // page * limit must not overflow the offset arithmetic
        let listed = service.list("articles", u32::MAX, 100).await.unwrap();
        assert!(listed.value.is_empty());

        let first = service.list("articles", 1, 100).await.unwrap();
        assert_eq!(first.value.len(), 1);
    }

    #[tokio::test]
    async fn mutate_stamps_the_actor_in_the_same_write() {
        let service = DocumentService::new(memory_state());
        let mut data = Map::new();
        data.insert("count".into(), json!(1));
        service.create("posts", Some("p1"), data, "author").await.unwrap();

        let mutated = service
            .mutate(
                "posts",
                "p1",
                vec![FieldMutation::Increment { field: "count".into(), by: 2.0 }],
                "editor",
            )
            .await
            .unwrap();
        assert_eq!(mutated.value.data["count"], json!(3));
        assert_eq!(mutated.value.data["updatedBy"], json!("editor"));
        assert!(mutated.value.data["updatedAt"].is_string());
    }
}
