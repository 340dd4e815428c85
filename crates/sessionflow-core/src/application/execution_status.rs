//! Execution status reporting
//!
//! Combines the engine's description of an execution with what the history
//! analyzer can reconstruct from its event log.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::analyzer::ExecutionHistoryAnalyzer;
use crate::domain::history::{
    ExecutionFailureDetail, ExecutionId, ExecutionStatus, StepDescriptor,
};
use crate::domain::repository::{fetch_full_history, WorkflowEngine};
use crate::error::ErrorKind;
use crate::CoreError;

/// Progress report of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Execution identifier
    pub execution_id: ExecutionId,
    /// Status reported by the engine
    pub status: ExecutionStatus,
    /// Last state entered before the first failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepDescriptor>,
    /// Last state that completed with output
    pub last_successful_step: StepDescriptor,
    /// Last task failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailureDetail>,
    /// First failed map iteration, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_map_iteration: Option<StepDescriptor>,
    /// Final output of a succeeded execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// Service answering "where is this execution and why did it stop"
pub struct ExecutionStatusService {
    engine: Arc<dyn WorkflowEngine>,
}

impl ExecutionStatusService {
    /// Create a new service
    pub fn new(engine: Arc<dyn WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// Start an execution of the context workflow
    pub async fn start(&self, input: serde_json::Value) -> Result<ExecutionId, CoreError> {
        self.engine.start_execution(input).await
    }

    /// Build the progress report of an execution
    #[instrument(skip(self), fields(execution_id = %id))]
    pub async fn report(&self, id: &ExecutionId) -> Result<ExecutionReport, CoreError> {
        let description = self.engine.describe_execution(id).await?;
        let history = fetch_full_history(self.engine.as_ref(), id).await?;
        let analyzer = ExecutionHistoryAnalyzer::new(&history);

        let current_step = absent_on(analyzer.current_step(), ErrorKind::UnknownStep)?;
        let failure = absent_on(analyzer.execution_failure(), ErrorKind::NoTaskFailure)?;
        let failed_map_iteration = absent_on(
            analyzer.last_failed_map_iteration(),
            ErrorKind::NoMapIterationFailure,
        )?;

        debug!(
            status = ?description.status,
            events = history.len(),
            failed = failure.is_some(),
            "Built execution report"
        );

        Ok(ExecutionReport {
            execution_id: description.execution_id,
            status: description.status,
            current_step,
            last_successful_step: analyzer.last_successful_step(),
            failure,
            failed_map_iteration,
            output: description.output,
        })
    }
}

/// Turn the analyzer's "nothing found" error of `kind` into `None`
fn absent_on<T>(result: Result<T, CoreError>, kind: ErrorKind) -> Result<Option<T>, CoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == kind => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::history::{
        EventDetail, EventType, ExecutionDescription, HistoryPage, WorkflowEvent,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::mock;

    mock! {
        pub Engine {}

        #[async_trait]
        impl WorkflowEngine for Engine {
            async fn start_execution(&self, input: serde_json::Value) -> Result<ExecutionId, CoreError>;
            async fn describe_execution(&self, id: &ExecutionId) -> Result<ExecutionDescription, CoreError>;
            async fn get_execution_history(&self, id: &ExecutionId, next_token: Option<String>) -> Result<HistoryPage, CoreError>;
        }
    }

    fn described(status: ExecutionStatus) -> ExecutionDescription {
        ExecutionDescription {
            execution_id: ExecutionId("exec-1".to_string()),
            status,
            started_at: Utc::now(),
            stopped_at: None,
            output: None,
        }
    }

    fn engine_with(status: ExecutionStatus, events: Vec<WorkflowEvent>) -> MockEngine {
        let mut engine = MockEngine::new();
        engine
            .expect_describe_execution()
            .returning(move |_| Ok(described(status)));
        engine.expect_get_execution_history().returning(move |_, _| {
            Ok(HistoryPage {
                events: Some(events.clone()),
                next_token: None,
            })
        });
        engine
    }

    fn failed(id: u64, step: &str, cause: &str) -> WorkflowEvent {
        WorkflowEvent::new(id, EventType::TaskFailed, Some(step.to_string())).with_detail(
            EventDetail {
                resource_type: Some("lambda".to_string()),
                error: Some("AccessSourceError".to_string()),
                cause: Some(cause.to_string()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_report_for_failed_execution() {
        let events = vec![
            WorkflowEvent::new(1, EventType::StateEntered, Some("ValidateToken".into())),
            WorkflowEvent::new(2, EventType::StateExited, Some("ValidateToken".into()))
                .with_detail(EventDetail {
                    output: Some("{\"userId\":\"u1\"}".to_string()),
                    ..Default::default()
                }),
            WorkflowEvent::new(3, EventType::StateEntered, Some("FetchProductAccess".into())),
            failed(
                4,
                "FetchProductAccess",
                r#"{"errorMessage":"upstream down","errorType":"AccessSourceError"}"#,
            ),
        ];
        let service = ExecutionStatusService::new(Arc::new(engine_with(ExecutionStatus::Failed, events)));

        let report = service.report(&ExecutionId("exec-1".into())).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(
            report.current_step,
            Some(StepDescriptor::new("TaskStateEntered", "FetchProductAccess"))
        );
        assert_eq!(
            report.last_successful_step,
            StepDescriptor::new("TaskStateExited", "ValidateToken")
        );
        let failure = report.failure.unwrap();
        assert_eq!(failure.error, "AccessSourceError");
        assert_eq!(
            failure.cause.unwrap().error_message.as_deref(),
            Some("upstream down")
        );
        assert!(report.failed_map_iteration.is_none());
    }

    #[tokio::test]
    async fn test_report_for_empty_history() {
        let service =
            ExecutionStatusService::new(Arc::new(engine_with(ExecutionStatus::Running, vec![])));

        let report = service.report(&ExecutionId("exec-1".into())).await.unwrap();

        assert!(report.current_step.is_none());
        assert!(report.failure.is_none());
        assert_eq!(report.last_successful_step.name, "State Provision started");
    }

    #[tokio::test]
    async fn test_report_propagates_malformed_cause() {
        let events = vec![
            WorkflowEvent::new(1, EventType::StateEntered, Some("UpdateContext".into())),
            failed(2, "UpdateContext", "not json"),
        ];
        let service = ExecutionStatusService::new(Arc::new(engine_with(ExecutionStatus::Failed, events)));

        let err = service.report(&ExecutionId("exec-1".into())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedCause);
    }

    #[tokio::test]
    async fn test_report_propagates_describe_error() {
        let mut engine = MockEngine::new();
        engine
            .expect_describe_execution()
            .returning(|id| Err(CoreError::HistoryNotFound(id.to_string())));
        engine.expect_get_execution_history().never();

        let service = ExecutionStatusService::new(Arc::new(engine));
        let err = service.report(&ExecutionId("gone".into())).await.unwrap_err();
        assert!(matches!(err, CoreError::HistoryNotFound(_)));
    }
}
