//! Error types for the sessionflow server
//!
//! This module contains the error type used throughout the server.

use thiserror::Error;

use sessionflow_core::{CoreError, ErrorKind};

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Unauthorized error
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A remote collaborator failed
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),

    /// Error raised by the workflow or analyzer
    #[error(transparent)]
    Core(CoreError),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err.kind() {
            ErrorKind::Authentication => ServerError::Unauthorized(err.details().to_string()),
            ErrorKind::Validation => ServerError::ValidationError(err.details().to_string()),
            ErrorKind::Configuration => ServerError::ConfigError(err.details().to_string()),
            _ => ServerError::Core(err),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::ValidationError(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        ServerError::UpstreamError(format!("HTTP request error: {}", err))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::InternalError(format!("IO error: {}", err))
    }
}

impl ServerError {
    /// Stable error code used in API responses
    pub fn code(&self) -> String {
        match self {
            ServerError::NotFound(_) => "ERR_NOT_FOUND".to_string(),
            ServerError::ValidationError(_) => "ERR_VALIDATION_ERROR".to_string(),
            ServerError::Unauthorized(_) => "ERR_UNAUTHORIZED".to_string(),
            ServerError::UpstreamError(_) => "ERR_UPSTREAM_ERROR".to_string(),
            ServerError::ConfigError(_) => "ERR_CONFIG_ERROR".to_string(),
            ServerError::InternalError(_) => "ERR_INTERNAL_SERVER_ERROR".to_string(),
            ServerError::Core(err) => format!("ERR_{}", screaming_snake(err.kind().as_str())),
        }
    }

    /// HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::NotFound(_) => 404,
            ServerError::ValidationError(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::UpstreamError(_) => 502,
            ServerError::ConfigError(_) | ServerError::InternalError(_) => 500,
            ServerError::Core(err) => err.status_code(),
        }
    }
}

/// `AccessSourceError` -> `ACCESS_SOURCE_ERROR`
fn screaming_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_keep_their_kind() {
        let err = ServerError::from(CoreError::AccessSource("boom".to_string()));
        assert_eq!(err.code(), "ERR_ACCESS_SOURCE_ERROR");
        assert_eq!(err.status_code(), 502);

        let err = ServerError::from(CoreError::NoTaskFailure("none".to_string()));
        assert_eq!(err.code(), "ERR_NO_TASK_FAILURE_ERROR");
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_authentication_becomes_unauthorized() {
        let err = ServerError::from(CoreError::Authentication("expired".to_string()));
        assert!(matches!(err, ServerError::Unauthorized(ref msg) if msg == "expired"));
        assert_eq!(err.status_code(), 401);
    }
}
