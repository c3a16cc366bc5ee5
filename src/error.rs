//! Error types for podsync
//!
//! This module provides error handling for the whole crate, including:
//! - Domain-specific error kinds (storage, download, config, cleanup, etc.)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for podsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podsync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage.type")
        key: Option<String>,
    },

    /// Record missing from the durable store
    #[error("not found: {0}")]
    NotFound(String),

    /// Insert-if-absent refused because the key already exists.
    ///
    /// Internal to the storage gateway; never surfaced as a user error.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Rate-limit signal from the media downloader (HTTP 429).
    ///
    /// Halts further downloads in the current run but the rest of the
    /// pipeline still completes.
    #[error("too many requests")]
    TooManyRequests,

    /// Media downloader subprocess failure other than rate limiting
    #[error("download failed: {0}")]
    Download(String),

    /// Transactional storage failure
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Artifact missing from the artifact store.
    ///
    /// Distinguishable from [`Error::NotFound`] so callers can treat missing
    /// media files as idempotent during delete and cleanup.
    #[error("no such artifact: {0}")]
    NotExist(String),

    /// Post-download hook returned a non-zero exit status
    #[error("hook {hook:?} failed: {message}")]
    Hook {
        /// The hook command that failed
        hook: String,
        /// Failure detail (exit status or spawn error)
        message: String,
    },

    /// Accumulated per-episode failures from the cleanup stage
    #[error("cleanup failed: {0}")]
    Cleanup(CleanupErrors),

    /// Rejected state machine transition for an episode status
    #[error("illegal episode status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the episode currently has
        from: String,
        /// Status the caller attempted to set
        to: String,
    },

    /// Request carried invalid input (bad identifier, mutated identity, etc.)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// External binary missing or unusable (yt-dlp, ffmpeg)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Invalid cron expression for a scheduled feed
    #[error("invalid cron expression {expression:?}: {message}")]
    InvalidCron {
        /// The offending expression
        expression: String,
        /// Parse failure detail
        message: String,
    },

    /// Remote object store request failed
    #[error("object store error: {0}")]
    ObjectStore(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServer(String),

    /// Shutdown in progress, not accepting new work
    #[error("shutdown in progress")]
    ShuttingDown,
}

/// A collection of independent failures gathered during a cleanup pass.
///
/// The cleanup stage keeps going when a single episode fails; all failures
/// are reported together once the pass completes.
#[derive(Debug, Default)]
pub struct CleanupErrors(pub Vec<String>);

impl CleanupErrors {
    /// Record a failure without aborting the pass
    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    /// True when no failures were recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a `Result`: `Ok` when empty, the accumulated error otherwise
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Cleanup(self))
        }
    }
}

impl std::fmt::Display for CleanupErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s): {}", self.0.len(), self.0.join("; "))
    }
}

/// API error response format
///
/// Returned by API endpoints when an error occurs: a machine-readable code,
/// a human-readable message, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "feed \"bbc\" not found"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidInput(_) => 400,
            Error::InvalidCron { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::NotExist(_) => 404,

            // 409 Conflict
            Error::AlreadyExists(_) => 409,
            Error::InvalidTransition { .. } => 409,

            // 429 Too Many Requests
            Error::TooManyRequests => 429,

            // 422 Unprocessable Entity - semantic errors
            Error::Download(_) => 422,
            Error::Hook { .. } => 422,
            Error::Cleanup(_) => 422,

            // 500 Internal Server Error
            Error::Storage(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServer(_) => 500,

            // 502 Bad Gateway - external service errors
            Error::ObjectStore(_) => 502,

            // 503 Service Unavailable
            Error::ExternalTool(_) => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::TooManyRequests => "too_many_requests",
            Error::Download(_) => "download_failed",
            Error::Storage(_) => "storage_error",
            Error::NotExist(_) => "artifact_not_found",
            Error::Hook { .. } => "hook_failed",
            Error::Cleanup(_) => "cleanup_failed",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::InvalidInput(_) => "invalid_input",
            Error::ExternalTool(_) => "external_tool_error",
            Error::InvalidCron { .. } => "invalid_cron",
            Error::ObjectStore(_) => "object_store_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServer(_) => "api_server_error",
            Error::ShuttingDown => "shutting_down",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::InvalidTransition { from, to } => Some(serde_json::json!({
                "from": from,
                "to": to,
            })),
            Error::Hook { hook, .. } => Some(serde_json::json!({ "hook": hook })),
            Error::Cleanup(errors) => Some(serde_json::json!({ "errors": errors.0 })),
            Error::InvalidCron { expression, .. } => {
                Some(serde_json::json!({ "expression": expression }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Returns (Error, expected_status_code, expected_error_code) for every
    /// reachable match arm in ToHttpStatus.
    fn all_error_variants() -> Vec<(Error, u16, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "bad value".into(),
                    key: Some("storage.type".into()),
                },
                400,
                "config_error",
            ),
            (
                Error::InvalidInput("episode ID must not change".into()),
                400,
                "invalid_input",
            ),
            (
                Error::InvalidCron {
                    expression: "* * *".into(),
                    message: "expected 5 fields".into(),
                },
                400,
                "invalid_cron",
            ),
            (Error::NotFound("feed \"bbc\"".into()), 404, "not_found"),
            (
                Error::NotExist("bbc/ep1.mp3".into()),
                404,
                "artifact_not_found",
            ),
            (
                Error::AlreadyExists("episode ep1".into()),
                409,
                "already_exists",
            ),
            (
                Error::InvalidTransition {
                    from: "cleaned".into(),
                    to: "new".into(),
                },
                409,
                "invalid_transition",
            ),
            (Error::TooManyRequests, 429, "too_many_requests"),
            (
                Error::Download("yt-dlp exited with 1".into()),
                422,
                "download_failed",
            ),
            (
                Error::Hook {
                    hook: "notify.sh".into(),
                    message: "exit status 2".into(),
                },
                422,
                "hook_failed",
            ),
            (
                Error::Cleanup(CleanupErrors(vec!["ep1: permission denied".into()])),
                422,
                "cleanup_failed",
            ),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                500,
                "io_error",
            ),
            (
                Error::ApiServer("bind failed".into()),
                500,
                "api_server_error",
            ),
            (
                Error::ExternalTool("yt-dlp binary not found".into()),
                503,
                "external_tool_error",
            ),
            (Error::ShuttingDown, 503, "shutting_down"),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_status_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let actual = error.status_code();
            assert_eq!(
                actual, expected_status,
                "Error variant with error_code={expected_code} returned status {actual}, expected {expected_status}"
            );
        }
    }

    #[test]
    fn every_variant_maps_to_expected_error_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let actual = error.error_code();
            assert_eq!(
                actual, expected_code,
                "Error variant with expected status={expected_status} returned error_code={actual}"
            );
        }
    }

    #[test]
    fn too_many_requests_is_429_not_500() {
        assert_eq!(Error::TooManyRequests.status_code(), 429);
    }

    #[test]
    fn artifact_not_exist_is_distinguishable_from_record_not_found() {
        let artifact = Error::NotExist("bbc/ep1.mp3".into());
        let record = Error::NotFound("feed \"bbc\"".into());
        assert_ne!(artifact.error_code(), record.error_code());
        assert!(matches!(artifact, Error::NotExist(_)));
    }

    #[test]
    fn cleanup_errors_accumulate_and_convert() {
        let errors = CleanupErrors::default();
        assert!(errors.is_empty());
        assert!(errors.into_result().is_ok());

        let mut errors = CleanupErrors::default();
        errors.push("ep1: permission denied");
        errors.push("ep2: read-only file system");
        let err = errors.into_result().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 error(s)"), "got: {msg}");
        assert!(msg.contains("ep1") && msg.contains("ep2"));
    }

    #[test]
    fn api_error_from_invalid_transition_has_from_and_to() {
        let err = Error::InvalidTransition {
            from: "cleaned".into(),
            to: "new".into(),
        };
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "invalid_transition");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["from"], "cleaned");
        assert_eq!(details["to"], "new");
    }

    #[test]
    fn api_error_from_cleanup_lists_individual_failures() {
        let err = Error::Cleanup(CleanupErrors(vec!["a".into(), "b".into()]));
        let api: ApiError = err.into();

        let details = api.error.details.expect("should have details");
        assert_eq!(details["errors"][0], "a");
        assert_eq!(details["errors"][1], "b");
    }

    #[test]
    fn api_error_from_not_found_has_no_details() {
        let api: ApiError = Error::NotFound("feed \"bbc\"".into()).into();
        assert_eq!(api.error.code, "not_found");
        assert!(api.error.details.is_none());
    }

    #[test]
    fn api_error_message_matches_error_display() {
        let err = Error::Download("exit status 1".into());
        let display_msg = err.to_string();
        let api: ApiError = err.into();
        assert_eq!(api.error.message, display_msg);
    }

    #[test]
    fn api_error_without_details_omits_details_in_json() {
        let api = ApiError::new("test_code", "test message");

        let json_str = serde_json::to_string(&api).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();

        assert_eq!(parsed["error"]["code"], "test_code");
        assert!(
            parsed["error"].get("details").is_none(),
            "details field should be omitted from JSON when None"
        );
    }
}
