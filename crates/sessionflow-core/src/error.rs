use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for the session-context runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Bearer token was invalid, expired or malformed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// No context record exists for the user
    #[error("Cache miss: {0}")]
    CacheMiss(String),

    /// A context record exists but failed the validity policy
    #[error("Cache invalid: {0}")]
    CacheInvalid(String),

    /// The access source rejected or failed a query or mutation
    #[error("Access source error: {0}")]
    AccessSource(String),

    /// The context store failed to read or write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A notification could not be delivered or dead-lettered
    #[error("Notification error: {0}")]
    Notification(String),

    /// No history could be fetched for an execution
    #[error("History not found: {0}")]
    HistoryNotFound(String),

    /// No state-entered event precedes the first failure
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    /// The history contains no map-iteration-failed event
    #[error("No map iteration failure: {0}")]
    NoMapIterationFailure(String),

    /// The history contains no task-failed event
    #[error("No task failure: {0}")]
    NoTaskFailure(String),

    /// A task-failed event carried a cause that is not a JSON object
    #[error("Malformed failure cause: {0}")]
    MalformedCause(String),

    /// The workflow engine rejected a call
    #[error("Workflow engine error: {0}")]
    WorkflowEngine(String),

    /// Input violated a data-model invariant
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Fieldless discriminant of [`CoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// See [`CoreError::Authentication`]
    Authentication,
    /// See [`CoreError::CacheMiss`]
    CacheMiss,
    /// See [`CoreError::CacheInvalid`]
    CacheInvalid,
    /// See [`CoreError::AccessSource`]
    AccessSource,
    /// See [`CoreError::Persistence`]
    Persistence,
    /// See [`CoreError::Notification`]
    Notification,
    /// See [`CoreError::HistoryNotFound`]
    HistoryNotFound,
    /// See [`CoreError::UnknownStep`]
    UnknownStep,
    /// See [`CoreError::NoMapIterationFailure`]
    NoMapIterationFailure,
    /// See [`CoreError::NoTaskFailure`]
    NoTaskFailure,
    /// See [`CoreError::MalformedCause`]
    MalformedCause,
    /// See [`CoreError::WorkflowEngine`]
    WorkflowEngine,
    /// See [`CoreError::Validation`]
    Validation,
    /// See [`CoreError::Serialization`]
    Serialization,
    /// See [`CoreError::Configuration`]
    Configuration,
}

impl ErrorKind {
    /// Stable name used as `errorType` in recorded failure causes
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::CacheMiss => "CacheMissError",
            ErrorKind::CacheInvalid => "CacheInvalidError",
            ErrorKind::AccessSource => "AccessSourceError",
            ErrorKind::Persistence => "PersistenceError",
            ErrorKind::Notification => "NotificationError",
            ErrorKind::HistoryNotFound => "HistoryNotFoundError",
            ErrorKind::UnknownStep => "UnknownStepError",
            ErrorKind::NoMapIterationFailure => "NoMapIterationFailureError",
            ErrorKind::NoTaskFailure => "NoTaskFailureError",
            ErrorKind::MalformedCause => "MalformedCauseError",
            ErrorKind::WorkflowEngine => "WorkflowEngineError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::Configuration => "ConfigurationError",
        }
    }

    /// Whether the workflow engine may retry a step that failed with this kind
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::AccessSource
                | ErrorKind::Persistence
                | ErrorKind::Notification
                | ErrorKind::WorkflowEngine
        )
    }
}

impl CoreError {
    /// Discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Authentication(_) => ErrorKind::Authentication,
            CoreError::CacheMiss(_) => ErrorKind::CacheMiss,
            CoreError::CacheInvalid(_) => ErrorKind::CacheInvalid,
            CoreError::AccessSource(_) => ErrorKind::AccessSource,
            CoreError::Persistence(_) => ErrorKind::Persistence,
            CoreError::Notification(_) => ErrorKind::Notification,
            CoreError::HistoryNotFound(_) => ErrorKind::HistoryNotFound,
            CoreError::UnknownStep(_) => ErrorKind::UnknownStep,
            CoreError::NoMapIterationFailure(_) => ErrorKind::NoMapIterationFailure,
            CoreError::NoTaskFailure(_) => ErrorKind::NoTaskFailure,
            CoreError::MalformedCause(_) => ErrorKind::MalformedCause,
            CoreError::WorkflowEngine(_) => ErrorKind::WorkflowEngine,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Serialization(_) => ErrorKind::Serialization,
            CoreError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Details payload carried by the error
    pub fn details(&self) -> &str {
        match self {
            CoreError::Authentication(d)
            | CoreError::CacheMiss(d)
            | CoreError::CacheInvalid(d)
            | CoreError::AccessSource(d)
            | CoreError::Persistence(d)
            | CoreError::Notification(d)
            | CoreError::HistoryNotFound(d)
            | CoreError::UnknownStep(d)
            | CoreError::NoMapIterationFailure(d)
            | CoreError::NoTaskFailure(d)
            | CoreError::MalformedCause(d)
            | CoreError::WorkflowEngine(d)
            | CoreError::Validation(d)
            | CoreError::Serialization(d)
            | CoreError::Configuration(d) => d,
        }
    }

    /// Whether the failed step may be retried
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// HTTP-style status code for surfacing the error to a caller
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Authentication => 401,
            ErrorKind::Validation => 400,
            ErrorKind::HistoryNotFound => 404,
            ErrorKind::UnknownStep
            | ErrorKind::NoMapIterationFailure
            | ErrorKind::NoTaskFailure => 404,
            ErrorKind::AccessSource | ErrorKind::Notification => 502,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
