// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};

use crate::provider::ProviderError;

/// One validation failure, reported per offending field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub rule: &'static str,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, rule: &'static str) -> Self {
        Self { field: field.into(), message: message.into(), value: None, rule }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    Validation {
        message: String,
        field_errors: Option<Vec<FieldError>>,
    },

    // 401 Unauthorized - code is one of MISSING_TOKEN, INVALID_TOKEN, TOKEN_REVOKED
    Authentication {
        code: &'static str,
        message: String,
    },

    // 403 Forbidden - code is one of INSUFFICIENT_ROLE, INSUFFICIENT_PERMISSION, OWNERSHIP_REQUIRED
    Authorization {
        code: &'static str,
        message: String,
    },

    // 404 Not Found
    NotFound(String),

    // 429 Too Many Requests
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    // 503 Service Unavailable - backing capability has no usable credentials
    NotConfigured(String),

    // 500 Internal Server Error
    Internal(String),
}

static IS_DEVELOPMENT: Lazy<bool> = Lazy::new(|| {
    !matches!(std::env::var("APP_ENV").as_deref(), Ok("production") | Ok("prod"))
});

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation { message: message.into(), field_errors: None }
    }

    pub fn validation_fields(message: impl Into<String>, field_errors: Vec<FieldError>) -> Self {
        ApiError::Validation { message: message.into(), field_errors: Some(field_errors) }
    }

    pub fn missing_token() -> Self {
        ApiError::Authentication {
            code: "MISSING_TOKEN",
            message: "Authorization header with a Bearer token is required".into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        ApiError::Authentication { code: "INVALID_TOKEN", message: message.into() }
    }

    pub fn token_revoked() -> Self {
        ApiError::Authentication { code: "TOKEN_REVOKED", message: "Token has been revoked".into() }
    }

    pub fn insufficient_role(message: impl Into<String>) -> Self {
        ApiError::Authorization { code: "INSUFFICIENT_ROLE", message: message.into() }
    }

    pub fn insufficient_permission(message: impl Into<String>) -> Self {
        ApiError::Authorization { code: "INSUFFICIENT_PERMISSION", message: message.into() }
    }

    pub fn ownership_required(message: impl Into<String>) -> Self {
        ApiError::Authorization { code: "OWNERSHIP_REQUIRED", message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        ApiError::RateLimited {
            message: "Too many requests, please slow down".into(),
            retry_after_secs,
        }
    }

    pub fn not_configured(capability: impl Into<String>) -> Self {
        ApiError::NotConfigured(capability.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Authorization { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Taxonomy label for the error object
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Authentication { .. } => "AUTHENTICATION_ERROR",
            ApiError::Authorization { .. } => "AUTHORIZATION_ERROR",
            ApiError::NotFound(_) => "RESOURCE_ERROR",
            ApiError::RateLimited { .. } => "RATE_LIMIT_ERROR",
            ApiError::NotConfigured(_) => "CONFIGURATION_ERROR",
            ApiError::Internal(_) => "UNKNOWN_ERROR",
        }
    }

    /// Short machine-readable code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Authentication { code, .. } => code,
            ApiError::Authorization { code, .. } => code,
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::NotConfigured(_) => "NOT_CONFIGURED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-safe message. Internal detail is elided outside development mode.
    pub fn client_message(&self) -> String {
        match self {
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::Authentication { message, .. } => message.clone(),
            ApiError::Authorization { message, .. } => message.clone(),
            ApiError::NotFound(message) => message.clone(),
            ApiError::RateLimited { message, .. } => message.clone(),
            ApiError::NotConfigured(capability) => {
                format!("Capability '{}' is not configured", capability)
            }
            ApiError::Internal(message) => {
                if *IS_DEVELOPMENT {
                    message.clone()
                } else {
                    "An internal error occurred".into()
                }
            }
        }
    }

    /// Convert to the error envelope body
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "type": self.error_type(),
            "code": self.error_code(),
            "message": self.client_message(),
        });

        match self {
            ApiError::Validation { field_errors: Some(errors), .. } => {
                error["field_errors"] = json!(errors);
            }
            ApiError::RateLimited { retry_after_secs, .. } => {
                error["retryAfter"] = json!(retry_after_secs);
            }
            _ => {}
        }

        json!({ "success": false, "error": error })
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => ApiError::not_found(msg),
            ProviderError::TokenExpired => ApiError::invalid_token("Token has expired"),
            ProviderError::TokenRevoked => ApiError::token_revoked(),
            ProviderError::InvalidToken(msg) => ApiError::invalid_token(msg),
            ProviderError::PermissionDenied(msg) => ApiError::Authorization {
                code: "PERMISSION_DENIED",
                message: msg,
            },
            ProviderError::InvalidArgument(msg) => ApiError::validation(msg),
            ProviderError::AlreadyExists(msg) => ApiError::validation(msg),
            ProviderError::Conflict(msg) => {
                tracing::warn!(error = %msg, "provider reported a write conflict");
                ApiError::internal(format!("Write conflict: {}", msg))
            }
            ProviderError::NotConfigured(capability) => ApiError::not_configured(capability),
            ProviderError::Unavailable(msg) => {
                tracing::error!(error = %msg, "provider unavailable");
                ApiError::internal(format!("Provider unavailable: {}", msg))
            }
            ProviderError::Other { code, message } => {
                tracing::error!(code = %code, error = %message, "unmapped provider error");
                ApiError::internal(format!("Provider error {}: {}", code, message))
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.client_message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, ApiError::Internal(_)) {
            // Full detail stays in the server log even when elided from the client
            tracing::error!(error = ?self, "request failed with internal error");
        }
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape_has_success_false_and_error_object() {
        let err = ApiError::missing_token();
        let body = err.to_json();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["code"], json!("MISSING_TOKEN"));
        assert_eq!(body["error"]["type"], json!("AUTHENTICATION_ERROR"));
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = ApiError::rate_limited(12);
        let body = err.to_json();
        assert_eq!(body["error"]["retryAfter"], json!(12));
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn provider_not_found_maps_to_404() {
        let err: ApiError = ProviderError::NotFound("users/abc".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_type(), "RESOURCE_ERROR");
    }

    #[test]
    fn validation_fields_are_serialized() {
        let err = ApiError::validation_fields(
            "Request validation failed",
            vec![FieldError::new("email", "must be a valid email address", "pattern")],
        );
        let body = err.to_json();
        assert_eq!(body["error"]["field_errors"][0]["field"], json!("email"));
        assert_eq!(body["error"]["field_errors"][0]["rule"], json!("pattern"));
    }
}
