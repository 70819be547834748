//! In-process emulator backend.
//!
//! One `MemoryBackend` serves all four capability traits. Semantics mirror
//! the real platform closely enough for handler and middleware behavior to
//! be exercised end-to-end without network access: HS256 bearer tokens,
//! custom tokens usable directly as credentials, per-uid revocation epochs,
//! sorted collections, a JSON tree for the realtime store, and a broadcast
//! channel feeding change subscriptions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::{
    AuthProvider, BlobMetadata, BlobStore, ChangeCallback, DocumentQuery, DocumentStore,
    FieldFilter, FieldMutation, FilterOp, Identity, NewUser, ProviderError, RealtimeEvent,
    RealtimeOrder, RealtimeQuery, RealtimeStore, SortDirection, StoredDocument,
    SubscriptionGuard, TransactionFn, UserPage, UserRecord, UserUpdate,
};

const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    claims: Map<String, Value>,
}

#[derive(Default)]
struct AuthState {
    users: HashMap<String, UserRecord>,
    /// Tokens issued before this instant are considered revoked
    revoked_after: HashMap<String, i64>,
}

#[derive(Default)]
struct DocState {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
}

#[derive(Default)]
struct BlobState {
    objects: BTreeMap<String, (Vec<u8>, BlobMetadata)>,
}

struct RealtimeState {
    tree: Value,
}

pub struct MemoryBackend {
    secret: String,
    auth: RwLock<AuthState>,
    docs: RwLock<DocState>,
    blobs: RwLock<BlobState>,
    realtime: RwLock<RealtimeState>,
    changes: broadcast::Sender<RealtimeEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            secret: "firegate-emulator-secret".into(),
            auth: RwLock::new(AuthState::default()),
            docs: RwLock::new(DocState::default()),
            blobs: RwLock::new(BlobState::default()),
            realtime: RwLock::new(RealtimeState { tree: Value::Null }),
            changes,
        }
    }

    fn mint(&self, uid: &str, claims: Map<String, Value>, email: Option<String>) -> Result<String, ProviderError> {
        let now = Utc::now().timestamp();
        let token = TokenClaims {
            sub: uid.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            email,
            email_verified: false,
            claims,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &token,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ProviderError::Other { code: "token-mint".into(), message: e.to_string() })
    }

    fn publish(&self, path: &str, data: Value) {
        // No subscribers is not an error
        let _ = self.changes.send(RealtimeEvent { path: path.to_string(), data });
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<Identity, ProviderError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => ProviderError::TokenExpired,
            _ => ProviderError::InvalidToken(e.to_string()),
        })?;

        let claims = data.claims;
        if check_revoked {
            let auth = self.auth.read().await;
            if let Some(revoked_after) = auth.revoked_after.get(&claims.sub) {
                if claims.iat <= *revoked_after {
                    return Err(ProviderError::TokenRevoked);
                }
            }
        }

        Ok(Identity {
            uid: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
            claims: claims.claims,
        })
    }

    async fn create_custom_token(
        &self,
        uid: &str,
        claims: Option<Map<String, Value>>,
    ) -> Result<String, ProviderError> {
        let claims = claims.unwrap_or_default();

        // Emulator convenience: minting a token for an unknown uid creates
        // the user record, and supplied claims become its custom claims so
        // the role/permission gates see them on re-fetch.
        let mut auth = self.auth.write().await;
        let record = auth.users.entry(uid.to_string()).or_insert_with(|| UserRecord {
            uid: uid.to_string(),
            email: None,
            email_verified: false,
            display_name: None,
            disabled: false,
            custom_claims: Map::new(),
            created_at: Some(Utc::now()),
            last_login_at: None,
        });
        for (k, v) in &claims {
            record.custom_claims.insert(k.clone(), v.clone());
        }
        let email = record.email.clone();
        drop(auth);

        self.mint(uid, claims, email)
    }

    async fn get_user(&self, uid: &str) -> Result<UserRecord, ProviderError> {
        self.auth
            .read()
            .await
            .users
            .get(uid)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("user {}", uid)))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, ProviderError> {
        let uid = user.uid.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let mut auth = self.auth.write().await;
        if auth.users.contains_key(&uid) {
            return Err(ProviderError::AlreadyExists(format!("user {}", uid)));
        }
        let record = UserRecord {
            uid: uid.clone(),
            email: user.email,
            email_verified: false,
            display_name: user.display_name,
            disabled: false,
            custom_claims: Map::new(),
            created_at: Some(Utc::now()),
            last_login_at: None,
        };
        auth.users.insert(uid, record.clone());
        Ok(record)
    }

    async fn update_user(
        &self,
        uid: &str,
        update: UserUpdate,
    ) -> Result<UserRecord, ProviderError> {
        let mut auth = self.auth.write().await;
        let record = auth
            .users
            .get_mut(uid)
            .ok_or_else(|| ProviderError::NotFound(format!("user {}", uid)))?;
        if let Some(email) = update.email {
            record.email = Some(email);
        }
        if let Some(name) = update.display_name {
            record.display_name = Some(name);
        }
        if let Some(disabled) = update.disabled {
            record.disabled = disabled;
        }
        Ok(record.clone())
    }

    async fn delete_user(&self, uid: &str) -> Result<(), ProviderError> {
        let mut auth = self.auth.write().await;
        auth.users
            .remove(uid)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("user {}", uid)))
    }

    async fn list_users(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<UserPage, ProviderError> {
        let auth = self.auth.read().await;
        let mut uids: Vec<&String> = auth.users.keys().collect();
        uids.sort();
        let start = match page_token {
            Some(token) => uids.iter().position(|u| u.as_str() > token).unwrap_or(uids.len()),
            None => 0,
        };
        let page: Vec<UserRecord> = uids
            .iter()
            .skip(start)
            .take(page_size as usize)
            .filter_map(|uid| auth.users.get(*uid).cloned())
            .collect();
        let next_page_token = if start + page.len() < uids.len() {
            page.last().map(|u| u.uid.clone())
        } else {
            None
        };
        Ok(UserPage { users: page, next_page_token })
    }

    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: Map<String, Value>,
    ) -> Result<(), ProviderError> {
        let mut auth = self.auth.write().await;
        let record = auth
            .users
            .get_mut(uid)
            .ok_or_else(|| ProviderError::NotFound(format!("user {}", uid)))?;
        record.custom_claims = claims;
        Ok(())
    }

    async fn revoke_tokens(&self, uid: &str) -> Result<(), ProviderError> {
        let mut auth = self.auth.write().await;
        if !auth.users.contains_key(uid) {
            return Err(ProviderError::NotFound(format!("user {}", uid)));
        }
        auth.revoked_after.insert(uid.to_string(), Utc::now().timestamp());
        Ok(())
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn matches_filter(doc: &Map<String, Value>, filter: &FieldFilter) -> bool {
    let field_value = doc.get(&filter.field).unwrap_or(&Value::Null);
    let ord = compare_values(field_value, &filter.value);
    match filter.op {
        FilterOp::Eq => field_value == &filter.value,
        FilterOp::Ne => field_value != &filter.value,
        FilterOp::Gt => !field_value.is_null() && ord == std::cmp::Ordering::Greater,
        FilterOp::Gte => !field_value.is_null() && ord != std::cmp::Ordering::Less,
        FilterOp::Lt => !field_value.is_null() && ord == std::cmp::Ordering::Less,
        FilterOp::Lte => !field_value.is_null() && ord != std::cmp::Ordering::Greater,
        FilterOp::In => filter
            .value
            .as_array()
            .map(|arr| arr.contains(field_value))
            .unwrap_or(false),
        FilterOp::ArrayContains => field_value
            .as_array()
            .map(|arr| arr.contains(&filter.value))
            .unwrap_or(false),
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<StoredDocument, ProviderError> {
        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let mut docs = self.docs.write().await;
        let coll = docs.collections.entry(collection.to_string()).or_default();
        if coll.contains_key(&id) {
            return Err(ProviderError::AlreadyExists(format!("{}/{}", collection, id)));
        }
        coll.insert(id.clone(), data.clone());
        Ok(StoredDocument { id, data })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<StoredDocument, ProviderError> {
        self.docs
            .read()
            .await
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| StoredDocument { id: id.to_string(), data: data.clone() })
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", collection, id)))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Map<String, Value>,
        merge: bool,
    ) -> Result<StoredDocument, ProviderError> {
        let mut docs = self.docs.write().await;
        let coll = docs
            .collections
            .get_mut(collection)
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", collection, id)))?;
        let existing = coll
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", collection, id)))?;
        if merge {
            for (k, v) in data {
                existing.insert(k, v);
            }
        } else {
            *existing = data;
        }
        Ok(StoredDocument { id: id.to_string(), data: existing.clone() })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ProviderError> {
        let mut docs = self.docs.write().await;
        docs.collections
            .get_mut(collection)
            .and_then(|c| c.remove(id))
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", collection, id)))
    }

    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<StoredDocument>, ProviderError> {
        let docs = self.docs.read().await;
        let coll = match docs.collections.get(collection) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        let mut matched: Vec<StoredDocument> = coll
            .iter()
            .filter(|(_, data)| query.filters.iter().all(|f| matches_filter(data, f)))
            .map(|(id, data)| StoredDocument { id: id.clone(), data: data.clone() })
            .collect();

        if let Some(order) = &query.order_by {
            matched.sort_by(|a, b| {
                let av = a.data.get(&order.field).unwrap_or(&Value::Null);
                let bv = b.data.get(&order.field).unwrap_or(&Value::Null);
                let ord = compare_values(av, bv);
                match order.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn mutate(
        &self,
        collection: &str,
        id: &str,
        mutations: Vec<FieldMutation>,
    ) -> Result<StoredDocument, ProviderError> {
        let mut docs = self.docs.write().await;
        let existing = docs
            .collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", collection, id)))?;

        for mutation in mutations {
            match mutation {
                FieldMutation::Set { field, value } => {
                    existing.insert(field, value);
                }
                FieldMutation::ArrayUnion { field, values } => {
                    let entry = existing.entry(field).or_insert_with(|| json!([]));
                    let arr = entry
                        .as_array_mut()
                        .ok_or_else(|| ProviderError::InvalidArgument("field is not an array".into()))?;
                    for v in values {
                        if !arr.contains(&v) {
                            arr.push(v);
                        }
                    }
                }
                FieldMutation::ArrayRemove { field, values } => {
                    if let Some(arr) = existing.get_mut(&field).and_then(Value::as_array_mut) {
                        arr.retain(|v| !values.contains(v));
                    }
                }
                FieldMutation::Increment { field, by } => {
                    let current = existing
                        .get(&field)
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    let next = current + by;
                    // Keep integers integral when both sides are whole
                    let value = if next.fract() == 0.0 {
                        json!(next as i64)
                    } else {
                        json!(next)
                    };
                    existing.insert(field, value);
                }
            }
        }

        Ok(StoredDocument { id: id.to_string(), data: existing.clone() })
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BlobMetadata, ProviderError> {
        let digest = Sha256::digest(&bytes);
        let now = Utc::now();
        let mut blobs = self.blobs.write().await;
        let created_at = blobs
            .objects
            .get(path)
            .and_then(|(_, meta)| meta.created_at)
            .unwrap_or(now);
        let meta = BlobMetadata {
            path: path.to_string(),
            bucket: "memory".into(),
            content_type: content_type.map(str::to_string),
            size: bytes.len() as u64,
            sha256: Some(format!("{:x}", digest)),
            created_at: Some(created_at),
            updated_at: Some(now),
        };
        blobs.objects.insert(path.to_string(), (bytes, meta.clone()));
        Ok(meta)
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, BlobMetadata), ProviderError> {
        self.blobs
            .read()
            .await
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("blob {}", path)))
    }

    async fn metadata(&self, path: &str) -> Result<BlobMetadata, ProviderError> {
        self.blobs
            .read()
            .await
            .objects
            .get(path)
            .map(|(_, meta)| meta.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("blob {}", path)))
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        self.blobs
            .write()
            .await
            .objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("blob {}", path)))
    }

    async fn list(&self, prefix: &str, max: u32) -> Result<Vec<BlobMetadata>, ProviderError> {
        Ok(self
            .blobs
            .read()
            .await
            .objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(max as usize)
            .map(|(_, (_, meta))| meta.clone())
            .collect())
    }

    async fn signed_read_url(
        &self,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, ProviderError> {
        self.metadata(path).await?;
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        // Shape mirrors a V2 signed URL closely enough for clients to parse
        Ok(format!(
            "http://memory.local/{}?Expires={}&Signature=emulated",
            path, expires
        ))
    }
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn tree_get<'a>(tree: &'a Value, path: &str) -> &'a Value {
    let mut node = tree;
    for seg in path_segments(path) {
        match node.get(seg) {
            Some(next) => node = next,
            None => return &Value::Null,
        }
    }
    node
}

fn tree_set(tree: &mut Value, path: &str, value: Value) {
    let segs = path_segments(path);
    if segs.is_empty() {
        *tree = value;
        return;
    }
    let mut node = tree;
    for seg in &segs[..segs.len() - 1] {
        if !node.is_object() {
            *node = json!({});
        }
        node = node
            .as_object_mut()
            .map(|m| m.entry(seg.to_string()).or_insert(Value::Null))
            .unwrap_or_else(|| unreachable!("node was just made an object"));
    }
    if !node.is_object() {
        *node = json!({});
    }
    if let Some(obj) = node.as_object_mut() {
        if value.is_null() {
            obj.remove(*segs.last().unwrap_or(&""));
        } else {
            obj.insert(segs[segs.len() - 1].to_string(), value);
        }
    }
}

#[async_trait]
impl RealtimeStore for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        Ok(tree_get(&self.realtime.read().await.tree, path).clone())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), ProviderError> {
        {
            let mut state = self.realtime.write().await;
            tree_set(&mut state.tree, path, value.clone());
        }
        self.publish(path, value);
        Ok(())
    }

    async fn update(&self, path: &str, value: Map<String, Value>) -> Result<(), ProviderError> {
        let merged = {
            let mut state = self.realtime.write().await;
            let mut current = tree_get(&state.tree, path).clone();
            if !current.is_object() {
                current = json!({});
            }
            if let Some(obj) = current.as_object_mut() {
                for (k, v) in value {
                    if v.is_null() {
                        obj.remove(&k);
                    } else {
                        obj.insert(k, v);
                    }
                }
            }
            tree_set(&mut state.tree, path, current.clone());
            current
        };
        self.publish(path, merged);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        {
            let mut state = self.realtime.write().await;
            tree_set(&mut state.tree, path, Value::Null);
        }
        self.publish(path, Value::Null);
        Ok(())
    }

    async fn query(&self, path: &str, query: &RealtimeQuery) -> Result<Value, ProviderError> {
        let node = tree_get(&self.realtime.read().await.tree, path).clone();
        let obj = match node {
            Value::Object(map) => map,
            other => return Ok(other),
        };

        let order = query.order();
        let sort_key = |key: &String, value: &Value| -> Value {
            match &order {
                RealtimeOrder::Key => Value::String(key.clone()),
                RealtimeOrder::Value => value.clone(),
                RealtimeOrder::Child(child) => {
                    value.get(child).cloned().unwrap_or(Value::Null)
                }
            }
        };

        let mut entries: Vec<(String, Value, Value)> = obj
            .into_iter()
            .map(|(k, v)| {
                let sk = sort_key(&k, &v);
                (k, v, sk)
            })
            .collect();
        entries.sort_by(|a, b| compare_values(&a.2, &b.2));

        entries.retain(|(_, _, sk)| {
            if let Some(eq) = &query.equal_to {
                return sk == eq;
            }
            if let Some(start) = &query.start_at {
                if compare_values(sk, start) == std::cmp::Ordering::Less {
                    return false;
                }
            }
            if let Some(end) = &query.end_at {
                if compare_values(sk, end) == std::cmp::Ordering::Greater {
                    return false;
                }
            }
            true
        });

        if let Some(first) = query.limit_to_first {
            entries.truncate(first as usize);
        } else if let Some(last) = query.limit_to_last {
            let skip = entries.len().saturating_sub(last as usize);
            entries.drain(..skip);
        }

        let mut result = Map::new();
        for (k, v, _) in entries {
            result.insert(k, v);
        }
        Ok(Value::Object(result))
    }

    async fn subscribe(
        &self,
        path: &str,
        callback: ChangeCallback,
    ) -> Result<SubscriptionGuard, ProviderError> {
        let mut rx = self.changes.subscribe();
        let prefix = path.trim_matches('/').to_string();
        let handle = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let event_path = event.path.trim_matches('/');
                if prefix.is_empty()
                    || event_path == prefix
                    || event_path.starts_with(&format!("{}/", prefix))
                    || prefix.starts_with(&format!("{}/", event_path))
                {
                    callback(event);
                }
            }
        });
        Ok(SubscriptionGuard::new(handle))
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn,
    ) -> Result<Value, ProviderError> {
        let result = {
            let mut state = self.realtime.write().await;
            let current = tree_get(&state.tree, path).clone();
            match update(current) {
                Some(next) => {
                    tree_set(&mut state.tree, path, next.clone());
                    next
                }
                None => return Err(ProviderError::Conflict(format!("transaction aborted at {}", path))),
            }
        };
        self.publish(path, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn custom_token_round_trips_through_verify() {
        let backend = MemoryBackend::new();
        let mut claims = Map::new();
        claims.insert("role".into(), json!("admin"));
        let token = backend.create_custom_token("alice", Some(claims)).await.unwrap();
        let identity = backend.verify_token(&token, false).await.unwrap();
        assert_eq!(identity.uid, "alice");
        assert_eq!(identity.claims.get("role"), Some(&json!("admin")));
    }

    #[tokio::test]
    async fn revoked_token_fails_only_with_revocation_check() {
        let backend = MemoryBackend::new();
        let token = backend.create_custom_token("bob", None).await.unwrap();
        // Ensure the revocation epoch lands at-or-after the token iat
        backend.revoke_tokens("bob").await.unwrap();
        assert!(backend.verify_token(&token, false).await.is_ok());
        assert!(matches!(
            backend.verify_token(&token, true).await,
            Err(ProviderError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn document_query_filters_orders_and_limits() {
        let backend = MemoryBackend::new();
        for (id, age) in [("a", 30), ("b", 20), ("c", 40)] {
            let mut data = Map::new();
            data.insert("age".into(), json!(age));
            backend.create("people", Some(id), data).await.unwrap();
        }
        let query = DocumentQuery {
            filters: vec![FieldFilter { field: "age".into(), op: FilterOp::Gte, value: json!(25) }],
            order_by: Some(super::super::OrderBy {
                field: "age".into(),
                direction: SortDirection::Desc,
            }),
            limit: Some(1),
            offset: None,
        };
        let results = DocumentStore::query(&backend, "people", &query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c");
    }

    #[tokio::test]
    async fn array_union_is_idempotent_and_increment_accumulates() {
        let backend = MemoryBackend::new();
        let mut data = Map::new();
        data.insert("tags".into(), json!(["a"]));
        data.insert("count".into(), json!(1));
        backend.create("posts", Some("p1"), data).await.unwrap();

        let doc = backend
            .mutate(
                "posts",
                "p1",
                vec![
                    FieldMutation::ArrayUnion { field: "tags".into(), values: vec![json!("a"), json!("b")] },
                    FieldMutation::Increment { field: "count".into(), by: 2.0 },
                ],
            )
            .await
            .unwrap();
        assert_eq!(doc.data["tags"], json!(["a", "b"]));
        assert_eq!(doc.data["count"], json!(3));
    }

    #[tokio::test]
    async fn realtime_tree_set_get_and_merge() {
        let backend = MemoryBackend::new();
        RealtimeStore::set(&backend, "rooms/lobby", json!({"topic": "hello", "count": 1}))
            .await
            .unwrap();
        let mut patch = Map::new();
        patch.insert("count".into(), json!(2));
        RealtimeStore::update(&backend, "rooms/lobby", patch).await.unwrap();
        let node = RealtimeStore::get(&backend, "rooms/lobby").await.unwrap();
        assert_eq!(node["topic"], json!("hello"));
        assert_eq!(node["count"], json!(2));
    }

    #[tokio::test]
    async fn subscription_receives_changes_until_cancelled() {
        let backend = MemoryBackend::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        let guard = backend
            .subscribe(
                "rooms",
                Arc::new(move |_event| {
                    hits_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        RealtimeStore::set(&backend, "rooms/a", json!(1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        guard.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        RealtimeStore::set(&backend, "rooms/b", json!(2)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transaction_applies_compare_and_swap() {
        let backend = MemoryBackend::new();
        RealtimeStore::set(&backend, "counters/x", json!(5)).await.unwrap();
        let result = backend
            .transaction(
                "counters/x",
                Arc::new(|current| {
                    let n = current.as_i64().unwrap_or(0);
                    Some(json!(n + 1))
                }),
            )
            .await
            .unwrap();
        assert_eq!(result, json!(6));
    }
}
