//! Firebase/GCP backend: reqwest clients for the provider REST surfaces.
//!
//! `FirebaseClient` owns credential resolution and OAuth token minting;
//! the per-capability types borrow it for authenticated calls.

mod auth;
mod firestore;
mod realtime;
mod storage;

pub use auth::FirebaseAuth;
pub use firestore::Firestore;
pub use realtime::RealtimeDatabase;
pub use storage::CloudStorage;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::ProviderConfig;

use super::ProviderError;

const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const OAUTH_SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform \
     https://www.googleapis.com/auth/firebase.database \
     https://www.googleapis.com/auth/userinfo.email";

// Refresh tokens a minute before the provider-reported expiry
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: Option<String>,
    pub client_email: String,
    pub private_key: String,
}

enum TokenSource {
    /// RS256 JWT grant signed with the service-account key
    ServiceAccount,
    /// Ambient application-default credentials via the metadata server
    Metadata,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

pub struct FirebaseClient {
    pub(crate) http: reqwest::Client,
    pub(crate) project_id: String,
    pub(crate) key: Option<ServiceAccountKey>,
    source: TokenSource,
    token_cache: Mutex<Option<CachedToken>>,
}

impl FirebaseClient {
    /// Construct a handle from the configured credential material. Attempts,
    /// in order: a local credential file, inline key material, ambient
    /// default credentials. The first that yields usable material wins.
    pub async fn initialize(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let mut key: Option<ServiceAccountKey> = None;

        if let Some(path) = &config.credentials_file {
            let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                ProviderError::NotConfigured(format!("credential file {}: {}", path, e))
            })?;
            let parsed: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
                ProviderError::NotConfigured(format!("credential file {}: {}", path, e))
            })?;
            key = Some(parsed);
        }

        if key.is_none() {
            if let (Some(private_key), Some(client_email)) =
                (&config.private_key, &config.client_email)
            {
                key = Some(ServiceAccountKey {
                    project_id: config.project_id.clone(),
                    client_email: client_email.clone(),
                    private_key: private_key.clone(),
                });
            }
        }

        let project_id = config
            .project_id
            .clone()
            .or_else(|| key.as_ref().and_then(|k| k.project_id.clone()))
            .ok_or_else(|| ProviderError::NotConfigured("project id".into()))?;

        let source = if key.is_some() {
            TokenSource::ServiceAccount
        } else {
            // Last resort: ambient credentials on GCP infrastructure
            TokenSource::Metadata
        };

        tracing::info!(
            project_id = %project_id,
            source = match source {
                TokenSource::ServiceAccount => "service-account",
                TokenSource::Metadata => "application-default",
            },
            "firebase capability handle initialized"
        );

        Ok(Self {
            http: reqwest::Client::new(),
            project_id,
            key,
            source,
            token_cache: Mutex::new(None),
        })
    }

    /// OAuth bearer token for provider REST calls, cached until near expiry.
    pub(crate) async fn access_token(&self) -> Result<String, ProviderError> {
        let now = Utc::now().timestamp();
        {
            let cache = self.token_cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.expires_at - TOKEN_EXPIRY_MARGIN_SECS > now {
                    return Ok(cached.token.clone());
                }
            }
        }

        let (token, expires_in) = match &self.source {
            TokenSource::ServiceAccount => self.fetch_jwt_grant_token().await?,
            TokenSource::Metadata => self.fetch_metadata_token().await?,
        };

        let mut cache = self.token_cache.lock().await;
        *cache = Some(CachedToken { token: token.clone(), expires_at: now + expires_in });
        Ok(token)
    }

    async fn fetch_jwt_grant_token(&self) -> Result<(String, i64), ProviderError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured("service account key".into()))?;

        #[derive(Serialize)]
        struct GrantClaims<'a> {
            iss: &'a str,
            scope: &'a str,
            aud: &'a str,
            iat: i64,
            exp: i64,
        }

        let now = Utc::now().timestamp();
        let claims = GrantClaims {
            iss: &key.client_email,
            scope: OAUTH_SCOPES,
            aud: OAUTH_TOKEN_URL,
            iat: now,
            exp: now + 3600,
        };
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::NotConfigured(format!("private key: {}", e)))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| ProviderError::Other { code: "jwt-grant".into(), message: e.to_string() })?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let response = self
            .http
            .post(OAUTH_TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Other {
                code: format!("oauth-{}", status.as_u16()),
                message: body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok((token.access_token, token.expires_in))
    }

    async fn fetch_metadata_token(&self) -> Result<(String, i64), ProviderError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                ProviderError::NotConfigured(format!("application default credentials: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::NotConfigured(
                "application default credentials unavailable".into(),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok((token.access_token, token.expires_in))
    }
}

/// Map a non-success provider HTTP response to the shared error surface.
pub(crate) fn map_http_error(
    status: reqwest::StatusCode,
    body: &str,
    context: &str,
) -> ProviderError {
    match status.as_u16() {
        404 => ProviderError::NotFound(context.to_string()),
        400 => ProviderError::InvalidArgument(format!("{}: {}", context, truncate(body))),
        401 | 403 => ProviderError::PermissionDenied(format!("{}: {}", context, truncate(body))),
        409 => ProviderError::AlreadyExists(context.to_string()),
        412 => ProviderError::Conflict(context.to_string()),
        500..=599 => ProviderError::Unavailable(format!("{}: {}", context, truncate(body))),
        code => ProviderError::Other {
            code: code.to_string(),
            message: format!("{}: {}", context, truncate(body)),
        },
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(512) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
