//! Blob capability over the Cloud Storage JSON API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{map_http_error, FirebaseClient};
use crate::provider::{BlobMetadata, BlobStore, ProviderError};

const STORAGE_BASE: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";
const SIGN_BLOB_BASE: &str = "https://iamcredentials.googleapis.com/v1";

pub struct CloudStorage {
    client: Arc<FirebaseClient>,
    bucket: String,
}

impl CloudStorage {
    pub fn new(client: Arc<FirebaseClient>, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/b/{}/o/{}",
            STORAGE_BASE,
            self.bucket,
            urlencode(path)
        )
    }

    fn metadata_from_api(&self, body: &Value) -> BlobMetadata {
        BlobMetadata {
            path: body
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            bucket: self.bucket.clone(),
            content_type: body
                .get("contentType")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            size: body
                .get("size")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            sha256: None,
            created_at: body
                .get("timeCreated")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            updated_at: body
                .get("updated")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

fn urlencode(path: &str) -> String {
    url::form_urlencoded::byte_serialize(path.as_bytes()).collect()
}

#[async_trait]
impl BlobStore for CloudStorage {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<BlobMetadata, ProviderError> {
        let token = self.client.access_token().await?;
        let checksum = format!("{:x}", Sha256::digest(&bytes));
        let url = format!(
            "{}/b/{}/o?uploadType=media&name={}",
            UPLOAD_BASE,
            self.bucket,
            urlencode(path)
        );

        let response = self
            .client
            .http
            .post(url)
            .bearer_auth(token)
            .header(
                "Content-Type",
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(bytes)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, path));
        }
        let body: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let mut meta = self.metadata_from_api(&body);
        meta.sha256 = Some(checksum);
        Ok(meta)
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, BlobMetadata), ProviderError> {
        let meta = self.metadata(path).await?;

        let token = self.client.access_token().await?;
        let url = format!("{}?alt=media", self.object_url(path));
        let response = self
            .client
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text, path));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok((bytes.to_vec(), meta))
    }

    async fn metadata(&self, path: &str) -> Result<BlobMetadata, ProviderError> {
        let token = self.client.access_token().await?;
        let response = self
            .client
            .http
            .get(self.object_url(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, path));
        }
        let body: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(self.metadata_from_api(&body))
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let token = self.client.access_token().await?;
        let response = self
            .client
            .http
            .delete(self.object_url(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text, path));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, max: u32) -> Result<Vec<BlobMetadata>, ProviderError> {
        let token = self.client.access_token().await?;
        let url = format!("{}/b/{}/o", STORAGE_BASE, self.bucket);
        let response = self
            .client
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[("prefix", prefix), ("maxResults", &max.to_string())])
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, prefix));
        }
        let body: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(body
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().map(|i| self.metadata_from_api(i)).collect())
            .unwrap_or_default())
    }

    /// V2 signed URL; the signature comes from the IAM credentials signBlob
    /// API so no local RSA primitive is needed.
    async fn signed_read_url(
        &self,
        path: &str,
        expires_in: Duration,
    ) -> Result<String, ProviderError> {
        let client_email = self
            .client
            .key
            .as_ref()
            .map(|k| k.client_email.clone())
            .ok_or_else(|| {
                ProviderError::NotConfigured("signed URLs require a service account".into())
            })?;

        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let resource = format!("/{}/{}", self.bucket, path);
        let string_to_sign = format!("GET\n\n\n{}\n{}", expires, resource);

        let token = self.client.access_token().await?;
        let url = format!(
            "{}/projects/-/serviceAccounts/{}:signBlob",
            SIGN_BLOB_BASE, client_email
        );
        let payload = base64::engine::general_purpose::STANDARD.encode(string_to_sign.as_bytes());
        let response = self
            .client
            .http
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "payload": payload }))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, "signBlob"));
        }
        let body: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let signature = body
            .get("signedBlob")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::Unavailable("signBlob returned no signature".into()))?;

        Ok(format!(
            "https://storage.googleapis.com{}?GoogleAccessId={}&Expires={}&Signature={}",
            resource,
            urlencode(&client_email),
            expires,
            urlencode(signature)
        ))
    }
}
