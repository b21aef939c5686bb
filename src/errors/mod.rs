// Error taxonomy and wire-level error formatting
//
// Every failure the pipeline can surface maps to exactly one `ErrorKind`.
// The kind fixes the HTTP status and whether a Retry-After hint is sent.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Closed set of error kinds exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    VersionNotFound,
    VersionEnvironmentMismatch,
    ValidationError,
    InvalidVersion,
    RateLimited,
    OutputParseFailed,
    OutputValidationFailed,
    LlmTimeout,
    LlmError,
    InternalError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::Unauthorized,
        ErrorKind::Forbidden,
        ErrorKind::NotFound,
        ErrorKind::VersionNotFound,
        ErrorKind::VersionEnvironmentMismatch,
        ErrorKind::ValidationError,
        ErrorKind::InvalidVersion,
        ErrorKind::RateLimited,
        ErrorKind::OutputParseFailed,
        ErrorKind::OutputValidationFailed,
        ErrorKind::LlmTimeout,
        ErrorKind::LlmError,
        ErrorKind::InternalError,
    ];

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::VersionNotFound => StatusCode::NOT_FOUND,
            ErrorKind::VersionEnvironmentMismatch => StatusCode::FORBIDDEN,
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidVersion => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::OutputParseFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::OutputValidationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::LlmTimeout => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::LlmError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::VersionNotFound => "VERSION_NOT_FOUND",
            ErrorKind::VersionEnvironmentMismatch => "VERSION_ENVIRONMENT_MISMATCH",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::InvalidVersion => "INVALID_VERSION",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::OutputParseFailed => "OUTPUT_PARSE_FAILED",
            ErrorKind::OutputValidationFailed => "OUTPUT_VALIDATION_FAILED",
            ErrorKind::LlmTimeout => "LLM_TIMEOUT",
            ErrorKind::LlmError => "LLM_ERROR",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Retryable kinds always carry a Retry-After hint.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::LlmTimeout | ErrorKind::LlmError
        )
    }

    /// Retry hint (seconds) used when the raising component did not compute one.
    pub fn default_retry_after(self) -> Option<u64> {
        match self {
            ErrorKind::RateLimited => Some(1),
            ErrorKind::LlmTimeout | ErrorKind::LlmError => Some(5),
            _ => None,
        }
    }

    /// User-facing message used when no more specific message is supplied.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "Missing or invalid API key",
            ErrorKind::Forbidden => "API key does not grant access to this resource",
            ErrorKind::NotFound => "No published version found for this intelligence",
            ErrorKind::VersionNotFound => "Requested version does not exist",
            ErrorKind::VersionEnvironmentMismatch => {
                "Requested version belongs to a different environment"
            }
            ErrorKind::ValidationError => "Input failed validation",
            ErrorKind::InvalidVersion => "X-Version must be a positive integer",
            ErrorKind::RateLimited => "Rate limit exceeded",
            ErrorKind::OutputParseFailed => "The model did not return valid JSON",
            ErrorKind::OutputValidationFailed => {
                "The model output did not match the output schema"
            }
            ErrorKind::LlmTimeout => "The model provider did not respond in time",
            ErrorKind::LlmError => "The model provider is currently unavailable",
            ErrorKind::InternalError => "An internal error occurred",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A typed pipeline failure, ready to be rendered on the wire.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
    pub retry_after: Option<u64>,
    pub request_id: Option<String>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            details: None,
            retry_after: None,
            request_id: None,
        }
    }

    /// Wrap an uncategorized failure.
    ///
    /// The full error chain is logged here; the caller only ever sees the
    /// generic INTERNAL_ERROR message.
    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "Uncategorized failure in request pipeline");
        Self::new(ErrorKind::InternalError)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds.max(1));
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Effective retry hint: explicit value, else the kind's default. Never
    /// present for non-retryable kinds.
    pub fn effective_retry_after(&self) -> Option<u64> {
        if !self.kind.is_retryable() {
            return None;
        }
        self.retry_after.or_else(|| self.kind.default_retry_after())
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            error: ErrorPayload {
                code: self.kind.code().to_string(),
                message: self.message.clone(),
                details: self.details.clone(),
                retry_after: self.effective_retry_after(),
            },
        }
    }
}

impl From<ErrorKind> for PipelineError {
    fn from(kind: ErrorKind) -> Self {
        PipelineError::new(kind)
    }
}

/// `{ success: false, error: { code, message, details?, retry_after? } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let request_id = self
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let retry_after = self.effective_retry_after();
        let body = Json(self.to_envelope());

        let mut response = (self.status(), body).into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        if let Some(seconds) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        let expected = [
            (ErrorKind::Unauthorized, 401),
            (ErrorKind::Forbidden, 403),
            (ErrorKind::NotFound, 404),
            (ErrorKind::VersionNotFound, 404),
            (ErrorKind::VersionEnvironmentMismatch, 403),
            (ErrorKind::ValidationError, 400),
            (ErrorKind::InvalidVersion, 400),
            (ErrorKind::RateLimited, 429),
            (ErrorKind::OutputParseFailed, 500),
            (ErrorKind::OutputValidationFailed, 500),
            (ErrorKind::LlmTimeout, 503),
            (ErrorKind::LlmError, 503),
            (ErrorKind::InternalError, 500),
        ];
        for (kind, status) in expected {
            assert_eq!(kind.status().as_u16(), status, "{kind}");
        }
    }

    #[test]
    fn test_code_matches_serde_name() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::json!(kind.code()));
        }
    }

    #[test]
    fn test_retry_after_only_for_retryable_kinds() {
        for kind in ErrorKind::ALL {
            let err = PipelineError::new(kind).with_retry_after(10);
            if kind.is_retryable() {
                assert_eq!(err.effective_retry_after(), Some(10));
            } else {
                assert_eq!(err.effective_retry_after(), None);
            }
        }
    }

    #[test]
    fn test_retryable_kinds_have_default_hint() {
        for kind in ErrorKind::ALL.into_iter().filter(|k| k.is_retryable()) {
            assert!(PipelineError::new(kind).effective_retry_after().is_some());
        }
    }

    #[test]
    fn test_into_response_sets_headers() {
        let response = PipelineError::new(ErrorKind::LlmError)
            .with_retry_after(30)
            .with_request_id("req-1")
            .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-1");
    }

    #[test]
    fn test_into_response_always_has_request_id() {
        let response = PipelineError::new(ErrorKind::NotFound).into_response();
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert!(!response.headers().contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn test_internal_hides_detail() {
        let err = PipelineError::internal(anyhow::anyhow!("/srv/secret/path.rs exploded"));
        assert_eq!(err.kind, ErrorKind::InternalError);
        assert!(!err.message.contains("/srv"));
        assert!(err.details.is_none());
    }
}
