//! Workflow execution history model
//!
//! Events are immutable and ordered by occurrence. The engine serves them in
//! pages; pages are concatenated in arrival order and never re-sorted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value object: workflow execution identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution status as reported by the workflow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Still running
    Running,
    /// Reached the terminal success state
    Succeeded,
    /// A step failed terminally
    Failed,
    /// Stopped by the engine's timeout
    TimedOut,
    /// Stopped by an operator
    Aborted,
}

impl ExecutionStatus {
    /// Whether the execution has finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Result of `describeExecution`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescription {
    /// Execution identifier
    pub execution_id: ExecutionId,
    /// Current status
    pub status: ExecutionStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Stop time, when terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Final output, when succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// Kind of a history event.
///
/// Only the first four kinds drive the analyzer; everything else is carried
/// through verbatim and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A task state was entered
    StateEntered,
    /// A task state was exited
    StateExited,
    /// A task failed
    TaskFailed,
    /// One iteration of a map state failed
    MapIterationFailed,
    /// Any other engine event
    Other(String),
}

impl EventType {
    /// Wire name of the event type
    pub fn as_str(&self) -> &str {
        match self {
            EventType::StateEntered => "TaskStateEntered",
            EventType::StateExited => "TaskStateExited",
            EventType::TaskFailed => "TaskFailed",
            EventType::MapIterationFailed => "MapIterationFailed",
            EventType::Other(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "TaskStateEntered" => EventType::StateEntered,
            "TaskStateExited" => EventType::StateExited,
            "TaskFailed" => EventType::TaskFailed,
            "MapIterationFailed" => EventType::MapIterationFailed,
            _ => EventType::Other(value),
        }
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of an event. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    /// State input (entered events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// State output (exited events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Resource that executed the task (failed events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Error name (failed events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw JSON cause (failed events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Iteration index (map events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// One entry in an execution's append-only history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    /// Position in the history, starting at 1
    pub id: u64,
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// State the event refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Kind-specific payload
    #[serde(default)]
    pub detail: EventDetail,
}

impl WorkflowEvent {
    /// Create an event without detail
    pub fn new(id: u64, event_type: EventType, step_name: Option<String>) -> Self {
        Self {
            id,
            event_type,
            timestamp: Utc::now(),
            step_name,
            detail: EventDetail::default(),
        }
    }

    /// Attach a detail payload
    pub fn with_detail(mut self, detail: EventDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One page of `getExecutionHistory`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Events of this page; `None` when the engine returned no event list
    #[serde(default)]
    pub events: Option<Vec<WorkflowEvent>>,
    /// Token for the next page, absent on the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Fully materialised, in-order history of one execution
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHistory {
    events: Vec<WorkflowEvent>,
}

impl ExecutionHistory {
    /// Wrap an already ordered event sequence
    pub fn new(events: Vec<WorkflowEvent>) -> Self {
        Self { events }
    }

    /// Append one page at the end
    pub fn extend_page(&mut self, page: Vec<WorkflowEvent>) {
        self.events.extend(page);
    }

    /// Events in occurrence order
    pub fn events(&self) -> &[WorkflowEvent] {
        &self.events
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether there are no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A step reference derived from an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Event or state type
    #[serde(rename = "type")]
    pub step_type: String,
    /// State name
    pub name: String,
}

impl StepDescriptor {
    /// Create a descriptor
    pub fn new(step_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            name: name.into(),
        }
    }
}

/// Structured cause of a task failure, parsed from the raw cause string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FailureCause {
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Error class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Stack lines, when the task reported them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<String>>,
    /// Any other fields of the cause object
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Explanation of the last task failure in an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailureDetail {
    /// Event type of the failure
    #[serde(rename = "type")]
    pub failure_type: String,
    /// Resource that executed the failed task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Error name
    pub error: String,
    /// Parsed cause, absent when the event carried none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
}
