//! Execution history analysis
//!
//! Reconstructs an execution's progress purely from its ordered event log.
//! Most queries only look at events strictly before the first task failure;
//! events after a hard failure are not part of the execution's progress.
//! Map-iteration failures are searched across the whole log.

use tracing::debug;

use super::history::{
    EventType, ExecutionFailureDetail, ExecutionHistory, FailureCause, StepDescriptor,
    WorkflowEvent,
};
use crate::CoreError;

/// Step type reported when nothing has completed yet
pub const PROVISION_STEP_TYPE: &str = "Pass";
/// Step name reported when nothing has completed yet
pub const PROVISION_STEP_NAME: &str = "State Provision started";

const UNKNOWN_STEP_NAME: &str = "Unknown step name";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Read-only queries over one execution's history
#[derive(Debug, Clone, Copy)]
pub struct ExecutionHistoryAnalyzer<'a> {
    events: &'a [WorkflowEvent],
}

impl<'a> ExecutionHistoryAnalyzer<'a> {
    /// Analyse a materialised history
    pub fn new(history: &'a ExecutionHistory) -> Self {
        Self {
            events: history.events(),
        }
    }

    /// Analyse a raw ordered event slice
    pub fn from_events(events: &'a [WorkflowEvent]) -> Self {
        Self { events }
    }

    /// Index of the first task-failed event
    pub fn first_failure_index(&self) -> Option<usize> {
        self.events
            .iter()
            .position(|event| event.event_type == EventType::TaskFailed)
    }

    /// Events strictly before the first failure, or all events without one
    fn progress(&self) -> &'a [WorkflowEvent] {
        match self.first_failure_index() {
            Some(index) => &self.events[..index],
            None => self.events,
        }
    }

    /// The last state entered before the first failure
    pub fn current_step(&self) -> Result<StepDescriptor, CoreError> {
        let entered = self
            .progress()
            .iter()
            .rev()
            .find(|event| event.event_type == EventType::StateEntered)
            .ok_or_else(|| {
                CoreError::UnknownStep(
                    "No state-entered event before the first failure".to_string(),
                )
            })?;

        let step = descriptor(entered);
        debug!(step_type = %step.step_type, step_name = %step.name, "Resolved current step");
        Ok(step)
    }

    /// The first map-iteration failure anywhere in the history
    pub fn last_failed_map_iteration(&self) -> Result<StepDescriptor, CoreError> {
        let (index, failed) = self
            .events
            .iter()
            .enumerate()
            .find(|(_, event)| event.event_type == EventType::MapIterationFailed)
            .ok_or_else(|| {
                CoreError::NoMapIterationFailure("No MapIterationFailed event found".to_string())
            })?;

        let step = descriptor(failed);
        debug!(index, step_name = %step.name, "Found map iteration failure");
        Ok(step)
    }

    /// The last state exited with output before the first failure.
    ///
    /// A history with no completed step yields the provisioning sentinel.
    pub fn last_successful_step(&self) -> StepDescriptor {
        let exited = self.progress().iter().rev().find(|event| {
            event.event_type == EventType::StateExited
                && event
                    .detail
                    .output
                    .as_deref()
                    .map_or(false, |output| !output.is_empty())
        });

        match exited {
            Some(event) => descriptor(event),
            None => {
                debug!("No successful step found, defaulting to provisioning sentinel");
                StepDescriptor::new(PROVISION_STEP_TYPE, PROVISION_STEP_NAME)
            }
        }
    }

    /// Details of the last task failure, with its cause parsed
    pub fn execution_failure(&self) -> Result<ExecutionFailureDetail, CoreError> {
        let failed = self
            .events
            .iter()
            .rev()
            .find(|event| event.event_type == EventType::TaskFailed)
            .ok_or_else(|| CoreError::NoTaskFailure("No TaskFailed events found".to_string()))?;

        // An empty cause is the same as no cause
        let cause = match failed.detail.cause.as_deref() {
            Some(raw) if !raw.is_empty() => Some(parse_cause(raw, failed.id)?),
            _ => None,
        };

        Ok(ExecutionFailureDetail {
            failure_type: failed.event_type.to_string(),
            resource_type: failed.detail.resource_type.clone(),
            error: failed
                .detail
                .error
                .clone()
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            cause,
        })
    }
}

fn descriptor(event: &WorkflowEvent) -> StepDescriptor {
    StepDescriptor::new(
        event.event_type.to_string(),
        event
            .step_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_STEP_NAME.to_string()),
    )
}

fn parse_cause(raw: &str, event_id: u64) -> Result<FailureCause, CoreError> {
    serde_json::from_str(raw).map_err(|err| {
        CoreError::MalformedCause(format!("Cause of event {} is not a JSON object: {}", event_id, err))
    })
}
