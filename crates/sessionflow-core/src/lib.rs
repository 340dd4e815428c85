//!
//! Sessionflow Core - session-context workflow runtime
//!
//! This crate defines the domain model of cached per-user session contexts,
//! the validity policy that decides when a cached context may be served, the
//! context workflow itself, and the analysis of workflow execution histories.
//! Storage, token verification, the access source and the workflow engine are
//! reached through the traits in [`domain::repository`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - context records, policies, history and collaborator traits
pub mod domain;

/// Application services - step handlers, orchestration and status reporting
pub mod application;

/// Core types and traits
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::{CoreError, ErrorKind};
pub use types::{Clock, EpochMillis, EpochSeconds, FixedClock, LazyHandle, SystemClock};

pub use application::execution_status::{ExecutionReport, ExecutionStatusService};
pub use application::orchestrator::{
    Advance, Collaborators, ContextOrchestrator, OrchestratorConfig, State, StateKind,
};
pub use domain::analyzer::ExecutionHistoryAnalyzer;
pub use domain::context::{AccessEntry, BasicInfo, ContextKey, ContextRecord, SessionInfo, UserId};
pub use domain::history::{
    EventType, ExecutionDescription, ExecutionHistory, ExecutionId, ExecutionStatus, HistoryPage,
    StepDescriptor, WorkflowEvent,
};
pub use domain::policy::{CacheDecision, CacheValidityPolicy, InvalidReason};
pub use domain::repository::{
    AccessSource, ContextStore, NotificationSink, TokenVerifier, WorkflowEngine,
};
