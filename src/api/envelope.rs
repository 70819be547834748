use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;

/// A value together with the wall-clock time its remote operation took.
/// Services produce these; handlers fold the timing into the envelope.
#[derive(Debug)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed_ms: u64,
}

impl<T> Timed<T> {
    pub fn new(value: T, elapsed_ms: u64) -> Self {
        Self { value, elapsed_ms }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timed<U> {
        Timed { value: f(self.value), elapsed_ms: self.elapsed_ms }
    }
}

/// Pagination block attached under `meta` on list responses.
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Per-batch outcome counts.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Wrapper for API responses that adds the uniform success envelope.
///
/// Every success body is `{ "success": true, "data": ..., ... }`; error
/// bodies come from `ApiError` and always carry `"success": false`. The
/// two shapes are mutually exclusive and `success` is always boolean.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status_code: StatusCode,
    pub message: Option<String>,
    pub timing_ms: Option<u64>,
    pub meta: Option<Value>,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful API response with default 200 status
    pub fn success(data: T) -> Self {
        Self {
            data,
            status_code: StatusCode::OK,
            message: None,
            timing_ms: None,
            meta: None,
            success: true,
        }
    }

    /// Create a 201 Created response
    pub fn created(data: T) -> Self {
        Self { status_code: StatusCode::CREATED, ..Self::success(data) }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the elapsed time of the backing remote operation (integer ms)
    pub fn with_timing(mut self, elapsed_ms: u64) -> Self {
        self.timing_ms = Some(elapsed_ms);
        self
    }

    /// Attach a pagination block under `meta`
    pub fn paginated(mut self, pagination: Pagination) -> Self {
        self.meta = Some(json!({ "pagination": pagination }));
        self
    }

    /// Batch responses report per-operation outcomes; the envelope's
    /// `success` mirrors whether every sub-operation succeeded, while the
    /// HTTP status stays 200 so clients can read the summary.
    pub fn batch(data: T, summary: BatchSummary) -> Self {
        let all_ok = summary.failed == 0;
        Self {
            data,
            status_code: StatusCode::OK,
            message: None,
            timing_ms: None,
            meta: Some(json!({ "summary": summary })),
            success: all_ok,
        }
    }

    /// Build a `Timed` service result into a response with timing attached
    pub fn timed(timed: Timed<T>) -> Self {
        let elapsed = timed.elapsed_ms;
        Self::success(timed.value).with_timing(elapsed)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let data_value = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response data");
                return ApiError::internal("Failed to serialize response data").into_response();
            }
        };

        let mut envelope = json!({
            "success": self.success,
            "data": data_value,
        });

        if let Some(message) = self.message {
            envelope["message"] = json!(message);
        }
        if let Some(ms) = self.timing_ms {
            envelope["timing"] = json!({ "ms": ms });
        }
        if let Some(meta) = self.meta {
            envelope["meta"] = meta;
        }

        (self.status_code, Json(envelope)).into_response()
    }
}

// Convenience alias used by every handler
pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json<T: Serialize>(resp: ApiResponse<T>) -> (StatusCode, Value) {
        let response = resp.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn success_envelope_wraps_data() {
        let (status, body) = body_json(ApiResponse::success(json!({"name": "x"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["name"], json!("x"));
    }

    #[tokio::test]
    async fn created_sets_201_and_timing_is_integer_ms() {
        let resp = ApiResponse::created(json!({"id": "1"})).with_timing(42);
        let (status, body) = body_json(resp).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["timing"]["ms"], json!(42));
    }

    #[tokio::test]
    async fn batch_envelope_reflects_failures() {
        let summary = BatchSummary { total: 3, successful: 2, failed: 1 };
        let (status, body) = body_json(ApiResponse::batch(json!([]), summary)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["meta"]["summary"]["failed"], json!(1));
    }

    #[tokio::test]
    async fn paginated_envelope_carries_meta() {
        let resp = ApiResponse::success(json!([1, 2])).paginated(Pagination {
            page: 2,
            limit: 10,
            count: 2,
            total: Some(12),
        });
        let (_, body) = body_json(resp).await;
        assert_eq!(body["meta"]["pagination"]["page"], json!(2));
        assert_eq!(body["meta"]["pagination"]["total"], json!(12));
    }
}
