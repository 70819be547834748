//! Realtime key-value capability over the RTDB REST API.
//!
//! Change subscriptions use the server-sent-events stream; transactions use
//! ETag-conditional writes, retried on contention inside this backend.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};

use super::{map_http_error, FirebaseClient};
use crate::provider::{
    ChangeCallback, ProviderError, RealtimeEvent, RealtimeOrder, RealtimeQuery, RealtimeStore,
    SubscriptionGuard, TransactionFn,
};

// Contention bound for ETag compare-and-swap writes
const TRANSACTION_ATTEMPTS: u32 = 25;

pub struct RealtimeDatabase {
    client: Arc<FirebaseClient>,
    base_url: String,
}

impl RealtimeDatabase {
    pub fn new(client: Arc<FirebaseClient>, database_url: String) -> Self {
        let base_url = database_url.trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn node_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        query: &[(String, String)],
    ) -> Result<Value, ProviderError> {
        let token = self.client.access_token().await?;
        let mut request = self
            .client
            .http
            .request(method, self.node_url(path))
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_error(status, &text, path));
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::Unavailable(e.to_string()))
    }
}

fn query_params(query: &RealtimeQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();

    // RTDB expects JSON-encoded parameter values, including the quotes
    let order = match query.order() {
        RealtimeOrder::Key => "\"$key\"".to_string(),
        RealtimeOrder::Value => "\"$value\"".to_string(),
        RealtimeOrder::Child(child) => format!("\"{}\"", child),
    };
    params.push(("orderBy".into(), order));

    if let Some(v) = &query.start_at {
        params.push(("startAt".into(), v.to_string()));
    }
    if let Some(v) = &query.end_at {
        params.push(("endAt".into(), v.to_string()));
    }
    if let Some(v) = &query.equal_to {
        params.push(("equalTo".into(), v.to_string()));
    }
    if let Some(n) = query.limit_to_first {
        params.push(("limitToFirst".into(), n.to_string()));
    }
    if let Some(n) = query.limit_to_last {
        params.push(("limitToLast".into(), n.to_string()));
    }

    params
}

#[async_trait]
impl RealtimeStore for RealtimeDatabase {
    async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        self.send(reqwest::Method::GET, path, None, &[]).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), ProviderError> {
        self.send(reqwest::Method::PUT, path, Some(&value), &[])
            .await?;
        Ok(())
    }

    async fn update(&self, path: &str, value: Map<String, Value>) -> Result<(), ProviderError> {
        self.send(
            reqwest::Method::PATCH,
            path,
            Some(&Value::Object(value)),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        self.send(reqwest::Method::DELETE, path, None, &[]).await?;
        Ok(())
    }

    async fn query(&self, path: &str, query: &RealtimeQuery) -> Result<Value, ProviderError> {
        self.send(reqwest::Method::GET, path, None, &query_params(query))
            .await
    }

    async fn subscribe(
        &self,
        path: &str,
        callback: ChangeCallback,
    ) -> Result<SubscriptionGuard, ProviderError> {
        let token = self.client.access_token().await?;
        let url = self.node_url(path);
        let http = self.client.http.clone();
        let root = path.trim_matches('/').to_string();

        let handle = tokio::spawn(async move {
            let response = match http
                .get(&url)
                .bearer_auth(&token)
                .header("Accept", "text/event-stream")
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(path = %root, error = %e, "realtime stream failed to open");
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut event_name = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(path = %root, error = %e, "realtime stream closed");
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end().to_string();
                    buffer.drain(..=newline);

                    if let Some(name) = line.strip_prefix("event: ") {
                        event_name = name.to_string();
                    } else if let Some(data) = line.strip_prefix("data: ") {
                        if event_name != "put" && event_name != "patch" {
                            continue;
                        }
                        let Ok(payload) = serde_json::from_str::<Value>(data) else {
                            continue;
                        };
                        let rel = payload
                            .get("path")
                            .and_then(|p| p.as_str())
                            .unwrap_or("/")
                            .trim_matches('/');
                        let full = if rel.is_empty() {
                            root.clone()
                        } else {
                            format!("{}/{}", root, rel)
                        };
                        callback(RealtimeEvent {
                            path: full,
                            data: payload.get("data").cloned().unwrap_or(Value::Null),
                        });
                    }
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
        let token = self.client.access_token().await?;
        let url = self.node_url(path);

        for _ in 0..TRANSACTION_ATTEMPTS {
            let response = self
                .client
                .http
                .get(&url)
                .bearer_auth(&token)
                .header("X-Firebase-ETag", "true")
                .send()
                .await
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

            let status = response.status();
            let etag = response
                .headers()
                .get("ETag")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(map_http_error(status, &text, path));
            }
            let current: Value = serde_json::from_str(&text)
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

            let next = match update(current) {
                Some(next) => next,
                None => {
                    return Err(ProviderError::Conflict(format!(
                        "transaction aborted at {}",
                        path
                    )))
                }
            };

            let write = self
                .client
                .http
                .put(&url)
                .bearer_auth(&token)
                .header("if-match", &etag)
                .json(&next)
                .send()
                .await
                .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

            match write.status().as_u16() {
                // Contention: someone else won, re-read and retry
                412 => continue,
                _ if write.status().is_success() => return Ok(next),
                _ => {
                    let status = write.status();
                    let body = write.text().await.unwrap_or_default();
                    return Err(map_http_error(status, &body, path));
                }
            }
        }

        Err(ProviderError::Conflict(format!(
            "transaction contention exhausted at {}",
            path
        )))
    }
}
