/// Context records and their keys
pub mod context;

/// Cache validity policy
pub mod policy;

/// Workflow execution history model
pub mod history;

/// Execution history analysis
pub mod analyzer;

/// Collaborator interfaces
pub mod repository;
