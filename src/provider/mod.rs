//! Capability seams for the managed platform.
//!
//! Each external capability (identity, document store, blob store, realtime
//! store) is consumed through one narrow async trait. Two backends exist:
//! [`firebase`] talks to the real provider REST APIs, [`memory`] is an
//! in-process emulator used by tests and local development.

pub mod firebase;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use crate::config::{ProviderBackend, ProviderConfig};

/// Failure surface shared by every backend. Service wrappers map these into
/// the API error taxonomy; nothing below this type leaks provider internals.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("capability not configured: {0}")]
    NotConfigured(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider error {code}: {message}")]
    Other { code: String, message: String },
}

/// Verified principal for one request. Produced once by token verification,
/// attached to the request context, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub email_verified: bool,
    pub claims: Map<String, Value>,
}

/// Full user record as held by the identity capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub disabled: bool,
    pub custom_claims: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub uid: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub disabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<UserRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Verify a bearer credential; `check_revoked` additionally consults the
    /// provider for revocation after signature/expiry checks pass.
    async fn verify_token(&self, token: &str, check_revoked: bool)
        -> Result<Identity, ProviderError>;
    async fn create_custom_token(
        &self,
        uid: &str,
        claims: Option<Map<String, Value>>,
    ) -> Result<String, ProviderError>;
    async fn get_user(&self, uid: &str) -> Result<UserRecord, ProviderError>;
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, ProviderError>;
    async fn update_user(&self, uid: &str, update: UserUpdate)
        -> Result<UserRecord, ProviderError>;
    async fn delete_user(&self, uid: &str) -> Result<(), ProviderError>;
    async fn list_users(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<UserPage, ProviderError>;
    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: Map<String, Value>,
    ) -> Result<(), ProviderError>;
    /// Invalidate previously issued tokens for the user.
    async fn revoke_tokens(&self, uid: &str) -> Result<(), ProviderError>;
}

/// One stored document: opaque id plus its field map. System fields
/// (createdAt, deleted, ...) are stamped by the service layer above.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub id: String,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    ArrayContains,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentQuery {
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Atomic single-call field mutations. `Set` writes a literal value in the
/// same commit as the transforms, so callers can attach bookkeeping fields
/// without a second round trip.
#[derive(Debug, Clone)]
pub enum FieldMutation {
    Set { field: String, value: Value },
    ArrayUnion { field: String, values: Vec<Value> },
    ArrayRemove { field: String, values: Vec<Value> },
    Increment { field: String, by: f64 },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<StoredDocument, ProviderError>;
    async fn get(&self, collection: &str, id: &str) -> Result<StoredDocument, ProviderError>;
    /// `merge = true` patches only the supplied fields; `false` replaces.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
        merge: bool,
    ) -> Result<StoredDocument, ProviderError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), ProviderError>;
    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<StoredDocument>, ProviderError>;
    async fn mutate(
        &self,
        collection: &str,
        id: &str,
        mutations: Vec<FieldMutation>,
    ) -> Result<StoredDocument, ProviderError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobMetadata {
    pub path: String,
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BlobMetadata, ProviderError>;
    async fn get(&self, path: &str) -> Result<(Vec<u8>, BlobMetadata), ProviderError>;
    async fn metadata(&self, path: &str) -> Result<BlobMetadata, ProviderError>;
    async fn delete(&self, path: &str) -> Result<(), ProviderError>;
    async fn list(&self, prefix: &str, max: u32) -> Result<Vec<BlobMetadata>, ProviderError>;
    /// Time-boxed signed read URL for direct client download.
    async fn signed_read_url(
        &self,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RealtimeOrder {
    #[default]
    Key,
    Value,
    Child(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealtimeQuery {
    pub order_by: Option<String>,
    /// Child key to sort on when `order_by` is `"child"`.
    pub child: Option<String>,
    pub start_at: Option<Value>,
    pub end_at: Option<Value>,
    pub equal_to: Option<Value>,
    pub limit_to_first: Option<u32>,
    pub limit_to_last: Option<u32>,
}

impl RealtimeQuery {
    /// Resolved sort key. Absent or unrecognized `order_by` sorts by key,
    /// matching the provider's lenient handling.
    pub fn order(&self) -> RealtimeOrder {
        match self.order_by.as_deref() {
            Some("value") => RealtimeOrder::Value,
            Some("child") => RealtimeOrder::Child(self.child.clone().unwrap_or_default()),
            _ => RealtimeOrder::Key,
        }
    }
}

/// One observed change under a subscribed path.
#[derive(Debug, Clone)]
pub struct RealtimeEvent {
    pub path: String,
    pub data: Value,
}

pub type ChangeCallback = Arc<dyn Fn(RealtimeEvent) + Send + Sync>;

/// Deregistration handle for a change subscription. Cancelling (or dropping)
/// the guard stops callback delivery.
pub struct SubscriptionGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl SubscriptionGuard {
    pub fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Pure transition applied inside a compare-and-swap transaction. Returning
/// `None` aborts. Retry-on-contention is owned by the backend.
pub type TransactionFn = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value, ProviderError>;
    async fn set(&self, path: &str, value: Value) -> Result<(), ProviderError>;
    /// Shallow merge of the supplied children into the node at `path`.
    async fn update(&self, path: &str, value: Map<String, Value>) -> Result<(), ProviderError>;
    async fn delete(&self, path: &str) -> Result<(), ProviderError>;
    async fn query(&self, path: &str, query: &RealtimeQuery) -> Result<Value, ProviderError>;
    async fn subscribe(
        &self,
        path: &str,
        callback: ChangeCallback,
    ) -> Result<SubscriptionGuard, ProviderError>;
    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn,
    ) -> Result<Value, ProviderError>;
}

/// Lazily constructed, memoized capability handles.
///
/// The first caller of each accessor attempts construction (credential file,
/// then inline key material, then ambient default credentials); subsequent
/// and re-entrant callers observe the already-initialized handle. A failed
/// construction is surfaced as `NotConfigured` on every call until the
/// configuration is fixed and the process restarted; it is never retried
/// within a call.
pub struct CapabilityRegistry {
    config: ProviderConfig,
    auth: OnceCell<Arc<dyn AuthProvider>>,
    documents: OnceCell<Arc<dyn DocumentStore>>,
    blobs: OnceCell<Arc<dyn BlobStore>>,
    realtime: OnceCell<Arc<dyn RealtimeStore>>,
    // The memory backend serves all four capabilities from one store
    memory: OnceCell<Arc<memory::MemoryBackend>>,
    firebase: OnceCell<Arc<firebase::FirebaseClient>>,
}

impl CapabilityRegistry {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            auth: OnceCell::new(),
            documents: OnceCell::new(),
            blobs: OnceCell::new(),
            realtime: OnceCell::new(),
            memory: OnceCell::new(),
            firebase: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn memory_backend(&self) -> Arc<memory::MemoryBackend> {
        self.memory
            .get_or_init(|| async move { Arc::new(memory::MemoryBackend::new()) })
            .await
            .clone()
    }

    async fn firebase_client(&self) -> Result<Arc<firebase::FirebaseClient>, ProviderError> {
        self.firebase
            .get_or_try_init(|| async {
                firebase::FirebaseClient::initialize(&self.config).await.map(Arc::new)
            })
            .await
            .cloned()
    }

    pub async fn auth(&self) -> Result<Arc<dyn AuthProvider>, ProviderError> {
        match self.config.backend {
            ProviderBackend::Memory => {
                let backend = self.memory_backend().await;
                Ok(self
                    .auth
                    .get_or_init(|| async move { backend as Arc<dyn AuthProvider> })
                    .await
                    .clone())
            }
            ProviderBackend::Firebase => {
                let client = self.firebase_client().await?;
                Ok(self
                    .auth
                    .get_or_init(|| async move {
                        Arc::new(firebase::FirebaseAuth::new(client)) as Arc<dyn AuthProvider>
                    })
                    .await
                    .clone())
            }
        }
    }

    pub async fn documents(&self) -> Result<Arc<dyn DocumentStore>, ProviderError> {
        match self.config.backend {
            ProviderBackend::Memory => {
                let backend = self.memory_backend().await;
                Ok(self
                    .documents
                    .get_or_init(|| async move { backend as Arc<dyn DocumentStore> })
                    .await
                    .clone())
            }
            ProviderBackend::Firebase => {
                let client = self.firebase_client().await?;
                Ok(self
                    .documents
                    .get_or_init(|| async move {
                        Arc::new(firebase::Firestore::new(client)) as Arc<dyn DocumentStore>
                    })
                    .await
                    .clone())
            }
        }
    }

    pub async fn blobs(&self) -> Result<Arc<dyn BlobStore>, ProviderError> {
        match self.config.backend {
            ProviderBackend::Memory => {
                let backend = self.memory_backend().await;
                Ok(self
                    .blobs
                    .get_or_init(|| async move { backend as Arc<dyn BlobStore> })
                    .await
                    .clone())
            }
            ProviderBackend::Firebase => {
                let client = self.firebase_client().await?;
                let bucket = self
                    .config
                    .storage_bucket_or_default()
                    .ok_or_else(|| ProviderError::NotConfigured("storage".into()))?;
                Ok(self
                    .blobs
                    .get_or_init(|| async move {
                        Arc::new(firebase::CloudStorage::new(client, bucket))
                            as Arc<dyn BlobStore>
                    })
                    .await
                    .clone())
            }
        }
    }

    pub async fn realtime(&self) -> Result<Arc<dyn RealtimeStore>, ProviderError> {
        match self.config.backend {
            ProviderBackend::Memory => {
                let backend = self.memory_backend().await;
                Ok(self
                    .realtime
                    .get_or_init(|| async move { backend as Arc<dyn RealtimeStore> })
                    .await
                    .clone())
            }
            ProviderBackend::Firebase => {
                let client = self.firebase_client().await?;
                let database_url = self
                    .config
                    .database_url
                    .clone()
                    .ok_or_else(|| ProviderError::NotConfigured("realtime".into()))?;
                Ok(self
                    .realtime
                    .get_or_init(|| async move {
                        Arc::new(firebase::RealtimeDatabase::new(client, database_url))
                            as Arc<dyn RealtimeStore>
                    })
                    .await
                    .clone())
            }
        }
    }
}
