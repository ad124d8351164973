//! Error types for the Moesif middleware.

use http::StatusCode;
use thiserror::Error;

/// Result type alias for middleware operations.
pub type Result<T, E = MoesifError> = std::result::Result<T, E>;

/// Errors surfaced to the code that builds or drives the middleware.
///
/// Nothing in here is ever returned on the request path: telemetry failures
/// are logged and swallowed there.
#[derive(Debug, Error)]
pub enum MoesifError {
    /// The application id is missing or empty.
    #[error("Moesif Application ID is required in settings")]
    MissingApplicationId,

    /// The middleware was built outside a Tokio runtime.
    #[error("Moesif middleware must be created inside a Tokio runtime")]
    RuntimeUnavailable,

    /// Configuration could not be loaded from the environment.
    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),

    /// A user or company profile failed validation before being sent.
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// The collection service call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors from calls to the remote collection service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service rejected the application id.
    #[error("Unauthorized access (status {0}), please check your Application Id")]
    Unauthorized(StatusCode),

    /// The service answered with a non-success status.
    #[error("Collector returned status {status}: {body}")]
    Status {
        /// Response status
        status: StatusCode,
        /// Response body, possibly truncated
        body: String,
    },

    /// Request or response payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    /// Map a non-success status into the matching variant.
    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        if (401..=403).contains(&status.as_u16()) {
            ApiError::Unauthorized(status)
        } else {
            ApiError::Status { status, body }
        }
    }

    /// Whether this error means the application id was rejected.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Errors raised while evaluating governance rules for a request.
///
/// The middleware treats any of these as "no governance effect".
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A rule carries a header name or value that is not valid HTTP.
    #[error("Rule {rule_id} has an invalid response header {name:?}")]
    InvalidHeader {
        /// Offending rule id
        rule_id: String,
        /// Header name as configured
        name: String,
    },

    /// A blocking rule carries a status outside 100..=999.
    #[error("Rule {rule_id} has an invalid response status {status}")]
    InvalidStatus {
        /// Offending rule id
        rule_id: String,
        /// Status as configured
        status: u16,
    },

    /// Building the synthesized response failed.
    #[error("Failed to build blocked response: {0}")]
    Response(#[from] http::Error),
}

/// Boxed error carried by response bodies the middleware hands back.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type returned by user-supplied hooks.
pub type HookError = BoxError;

/// Result type returned by user-supplied hooks.
pub type HookResult<T> = std::result::Result<T, HookError>;
