//! Maps the core error taxonomy onto HTTP responses.
//!
//! One adapter instead of per-handler status tables so the contract stays
//! uniform: `MissingContext` is always 500 (an internal bug, never an auth
//! problem), cross-tenant probes surface as plain 404s, and transient
//! database failures that exhausted their retries show up as generic 500s
//! without leaking scheduling detail.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use ledgerline_core::error::CoreError;

#[derive(Debug)]
pub struct ApiError(pub CoreError);

pub type ApiResult<T> = Result<T, ApiError>;

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match &self.0 {
            CoreError::MissingContext => "missing_context",
            CoreError::Unauthorized { .. } => "unauthorized",
            CoreError::Forbidden { .. } => "forbidden",
            CoreError::Conflict { .. } => "conflict",
            CoreError::NotFound { .. } => "not_found",
            CoreError::Validation { .. } => "validation_failed",
            CoreError::DecryptionFailed => "decryption_failed",
            CoreError::Crypto { .. } => "crypto_error",
            CoreError::SchemaViolation { .. } => "schema_violation",
            CoreError::Database { .. } => "database_error",
            CoreError::Retryable { .. } => "database_error",
            CoreError::Unavailable { .. } => "service_unavailable",
            CoreError::Provisioning { .. } => "provisioning_failed",
            CoreError::Configuration { .. } => "configuration_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            CoreError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
            CoreError::Conflict { .. } => StatusCode::CONFLICT,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
            CoreError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            // MissingContext and everything below are internal failures
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = serde_json::json!({
            "error": self.error_code(),
            "message": self.0.to_string(),
        });
        if let CoreError::Validation { messages } = &self.0 {
            body["details"] = serde_json::json!(messages);
        }
        if self.status_code().is_server_error() {
            log::error!("request failed: {}", self.0);
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::MissingContext, 500),
            (CoreError::unauthorized("bad signature"), 401),
            (CoreError::forbidden("tenant suspended"), 403),
            (CoreError::conflict("duplicate email"), 409),
            (CoreError::not_found("invoice"), 404),
            (CoreError::validation(vec!["amount".into()]), 400),
            (CoreError::DecryptionFailed, 500),
            (CoreError::database("boom"), 500),
            (CoreError::unavailable("pool exhausted"), 503),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status_code().as_u16(), status);
        }
    }

    #[test]
    fn test_missing_context_never_becomes_auth_error() {
        let status = ApiError(CoreError::MissingContext).status_code().as_u16();
        assert_ne!(status, 401);
        assert_ne!(status, 403);
        assert_eq!(status, 500);
    }
}
