//! Identity capability over the securetoken / identitytoolkit REST APIs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use super::{map_http_error, FirebaseClient};
use crate::provider::{
    AuthProvider, Identity, NewUser, ProviderError, UserPage, UserRecord, UserUpdate,
};

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const IDENTITY_TOOLKIT_BASE: &str = "https://identitytoolkit.googleapis.com/v1/projects";
const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

// ID-token signing keys rotate; re-fetch at most this often
const JWKS_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

struct CachedKeys {
    keys: HashMap<String, Jwk>,
    fetched_at: i64,
}

pub struct FirebaseAuth {
    client: Arc<FirebaseClient>,
    jwks: RwLock<Option<CachedKeys>>,
}

impl FirebaseAuth {
    pub fn new(client: Arc<FirebaseClient>) -> Self {
        Self { client, jwks: RwLock::new(None) }
    }

    fn accounts_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/accounts{}",
            IDENTITY_TOOLKIT_BASE, self.client.project_id, suffix
        )
    }

    async fn signing_key(&self, kid: &str) -> Result<Jwk, ProviderError> {
        let now = Utc::now().timestamp();
        {
            let cache = self.jwks.read().await;
            if let Some(cached) = cache.as_ref() {
                if now - cached.fetched_at < JWKS_TTL_SECS {
                    if let Some(key) = cached.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        #[derive(Deserialize)]
        struct JwkSet {
            keys: Vec<Jwk>,
        }

        let response = self
            .client
            .http
            .get(JWKS_URL)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let keys: HashMap<String, Jwk> =
            set.keys.into_iter().map(|k| (k.kid.clone(), k)).collect();
        let found = keys.get(kid).cloned();
        *self.jwks.write().await = Some(CachedKeys { keys, fetched_at: now });

        found.ok_or_else(|| ProviderError::InvalidToken(format!("unknown signing key {}", kid)))
    }

    async fn post_accounts(&self, suffix: &str, body: Value) -> Result<Value, ProviderError> {
        let token = self.client.access_token().await?;
        let response = self
            .client
            .http
            .post(self.accounts_url(suffix))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, &format!("accounts{}", suffix)));
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))
    }

    async fn lookup(&self, uid: &str) -> Result<Value, ProviderError> {
        let result = self
            .post_accounts(":lookup", json!({ "localId": [uid] }))
            .await?;
        result
            .get("users")
            .and_then(|u| u.as_array())
            .and_then(|u| u.first())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("user {}", uid)))
    }
}

fn parse_millis(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

fn user_record_from_api(user: &Value) -> UserRecord {
    let custom_claims = user
        .get("customAttributes")
        .and_then(|v| v.as_str())
        .and_then(|raw| serde_json::from_str::<Map<String, Value>>(raw).ok())
        .unwrap_or_default();

    UserRecord {
        uid: user
            .get("localId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        email: user.get("email").and_then(|v| v.as_str()).map(str::to_string),
        email_verified: user
            .get("emailVerified")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        display_name: user
            .get("displayName")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        disabled: user.get("disabled").and_then(|v| v.as_bool()).unwrap_or(false),
        custom_claims,
        created_at: parse_millis(user.get("createdAt")),
        last_login_at: parse_millis(user.get("lastLoginAt")),
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    async fn verify_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<Identity, ProviderError> {
        let header = decode_header(token)
            .map_err(|e| ProviderError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::InvalidToken("token has no key id".into()))?;
        let jwk = self.signing_key(&kid).await?;

        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| ProviderError::InvalidToken(e.to_string()))?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client.project_id]);
        validation.set_issuer(&[format!(
            "https://securetoken.google.com/{}",
            self.client.project_id
        )]);

        let data = decode::<Map<String, Value>>(token, &decoding_key, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ProviderError::TokenExpired,
                _ => ProviderError::InvalidToken(e.to_string()),
            },
        )?;
        let claims = data.claims;

        let uid = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidToken("token has no subject".into()))?
            .to_string();

        if check_revoked {
            let auth_time = claims.get("auth_time").and_then(|v| v.as_i64()).unwrap_or(0);
            let user = self.lookup(&uid).await?;
            let valid_since = user
                .get("validSince")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            if auth_time < valid_since {
                return Err(ProviderError::TokenRevoked);
            }
        }

        let email = claims.get("email").and_then(|v| v.as_str()).map(str::to_string);
        let email_verified = claims
            .get("email_verified")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // Everything beyond the reserved JWT fields is a custom claim
        const RESERVED: &[&str] = &[
            "iss", "aud", "auth_time", "sub", "iat", "exp", "email", "email_verified", "firebase",
        ];
        let custom: Map<String, Value> = claims
            .into_iter()
            .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
            .collect();

        Ok(Identity { uid, email, email_verified, claims: custom })
    }

    async fn create_custom_token(
        &self,
        uid: &str,
        claims: Option<Map<String, Value>>,
    ) -> Result<String, ProviderError> {
        let key = self.client.key.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured("custom tokens require a service account key".into())
        })?;

        #[derive(Serialize)]
        struct CustomTokenClaims<'a> {
            iss: &'a str,
            sub: &'a str,
            aud: &'a str,
            iat: i64,
            exp: i64,
            uid: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            claims: Option<Map<String, Value>>,
        }

        let now = Utc::now().timestamp();
        let token_claims = CustomTokenClaims {
            iss: &key.client_email,
            sub: &key.client_email,
            aud: CUSTOM_TOKEN_AUDIENCE,
            iat: now,
            exp: now + 3600,
            uid,
            claims,
        };

        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::NotConfigured(format!("private key: {}", e)))?;
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::RS256),
            &token_claims,
            &encoding_key,
        )
        .map_err(|e| ProviderError::Other { code: "custom-token".into(), message: e.to_string() })
    }

    async fn get_user(&self, uid: &str) -> Result<UserRecord, ProviderError> {
        let user = self.lookup(uid).await?;
        Ok(user_record_from_api(&user))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, ProviderError> {
        let mut body = Map::new();
        if let Some(uid) = &user.uid {
            body.insert("localId".into(), json!(uid));
        }
        if let Some(email) = &user.email {
            body.insert("email".into(), json!(email));
        }
        if let Some(password) = &user.password {
            body.insert("password".into(), json!(password));
        }
        if let Some(name) = &user.display_name {
            body.insert("displayName".into(), json!(name));
        }

        let created = self.post_accounts("", Value::Object(body)).await?;
        let uid = created
            .get("localId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::Unavailable("create returned no localId".into()))?
            .to_string();
        self.get_user(&uid).await
    }

    async fn update_user(
        &self,
        uid: &str,
        update: UserUpdate,
    ) -> Result<UserRecord, ProviderError> {
        let mut body = Map::new();
        body.insert("localId".into(), json!(uid));
        if let Some(email) = &update.email {
            body.insert("email".into(), json!(email));
        }
        if let Some(name) = &update.display_name {
            body.insert("displayName".into(), json!(name));
        }
        if let Some(disabled) = update.disabled {
            body.insert("disableUser".into(), json!(disabled));
        }

        self.post_accounts(":update", Value::Object(body)).await?;
        self.get_user(uid).await
    }

    async fn delete_user(&self, uid: &str) -> Result<(), ProviderError> {
        self.post_accounts(":delete", json!({ "localId": uid })).await?;
        Ok(())
    }

    async fn list_users(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<UserPage, ProviderError> {
        let token = self.client.access_token().await?;
        let mut request = self
            .client
            .http
            .get(self.accounts_url(":batchGet"))
            .bearer_auth(token)
            .query(&[("maxResults", page_size.to_string())]);
        if let Some(next) = page_token {
            request = request.query(&[("nextPageToken", next)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, "accounts:batchGet"));
        }
        let body: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let users = body
            .get("users")
            .and_then(|u| u.as_array())
            .map(|arr| arr.iter().map(user_record_from_api).collect())
            .unwrap_or_default();
        let next_page_token = body
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(UserPage { users, next_page_token })
    }

    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: Map<String, Value>,
    ) -> Result<(), ProviderError> {
        let serialized = serde_json::to_string(&claims)
            .map_err(|e| ProviderError::InvalidArgument(e.to_string()))?;
        self.post_accounts(
            ":update",
            json!({ "localId": uid, "customAttributes": serialized }),
        )
        .await?;
        Ok(())
    }

    async fn revoke_tokens(&self, uid: &str) -> Result<(), ProviderError> {
        let now = Utc::now().timestamp();
        self.post_accounts(
            ":update",
            json!({ "localId": uid, "validSince": now.to_string() }),
        )
        .await?;
        Ok(())
    }
}
