/// Step handlers of the context workflow
pub mod steps;

/// Context workflow definition
pub mod orchestrator;

/// Execution status reporting
pub mod execution_status;
