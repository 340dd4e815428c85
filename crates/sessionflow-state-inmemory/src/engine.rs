//! Local workflow engine
//!
//! Runs the context workflow on a spawned tokio task per execution, driving
//! the orchestrator one state at a time and recording an append-only history
//! in the same event vocabulary a hosted engine would produce.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use sessionflow_core::{
    domain::history::EventDetail,
    domain::repository::WorkflowEngine,
    Advance, ContextOrchestrator, CoreError, EventType, ExecutionDescription, ExecutionId,
    ExecutionStatus, HistoryPage, State, StateKind, WorkflowEvent,
};

/// Default number of events per history page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of finished executions kept for status queries
pub const DEFAULT_MAX_FINISHED_EXECUTIONS: usize = 1000;

const REDACTED: &str = "[REDACTED]";

const RESOURCE_TYPE: &str = "sessionflow";

/// Retry policy for task states failing with a retryable error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Double the delay after every retry
    pub exponential_backoff: bool,
}

impl Default for StepRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
            exponential_backoff: true,
        }
    }
}

impl StepRetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            exponential_backoff: false,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        if self.exponential_backoff {
            self.retry_delay
                .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
        } else {
            self.retry_delay
        }
    }
}

/// Configuration of the local engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Events per history page
    pub page_size: usize,
    /// Task retry policy
    pub retry: StepRetryPolicy,
    /// Finished executions kept before the oldest one is forgotten
    pub max_finished_executions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            retry: StepRetryPolicy::default(),
            max_finished_executions: DEFAULT_MAX_FINISHED_EXECUTIONS,
        }
    }
}

struct ExecutionEntry {
    description: ExecutionDescription,
    events: Vec<WorkflowEvent>,
    status_rx: watch::Receiver<ExecutionStatus>,
}

/// Known executions. Running ones are always kept; finished ones are kept
/// in finishing order up to a cap.
#[derive(Default)]
struct ExecutionTable {
    entries: HashMap<ExecutionId, ExecutionEntry>,
    finished: VecDeque<ExecutionId>,
}

impl ExecutionTable {
    fn mark_finished(&mut self, id: &ExecutionId, max_finished: usize) {
        self.finished.push_back(id.clone());
        while self.finished.len() > max_finished {
            if let Some(evicted) = self.finished.pop_front() {
                self.entries.remove(&evicted);
                debug!(execution_id = %evicted, "Evicted finished execution");
            }
        }
    }
}

type Executions = Arc<RwLock<ExecutionTable>>;

/// In-process implementation of the WorkflowEngine
pub struct InMemoryWorkflowEngine {
    orchestrator: Arc<ContextOrchestrator>,
    executions: Executions,
    config: EngineConfig,
}

impl InMemoryWorkflowEngine {
    /// Create an engine running `orchestrator`
    pub fn new(orchestrator: Arc<ContextOrchestrator>, config: EngineConfig) -> Self {
        Self {
            orchestrator,
            executions: Arc::new(RwLock::new(ExecutionTable::default())),
            config: EngineConfig {
                page_size: config.page_size.max(1),
                max_finished_executions: config.max_finished_executions.max(1),
                ..config
            },
        }
    }

    /// Wait until the execution leaves `Running` and return its final status
    pub async fn wait_for_completion(&self, id: &ExecutionId) -> Result<ExecutionStatus, CoreError> {
        let mut status_rx = {
            let executions = self.executions.read().await;
            executions
                .entries
                .get(id)
                .map(|entry| entry.status_rx.clone())
                .ok_or_else(|| not_found(id))?
        };

        loop {
            let status = *status_rx.borrow_and_update();
            if status.is_terminal() {
                return Ok(status);
            }
            status_rx.changed().await.map_err(|_| {
                CoreError::WorkflowEngine(format!("Execution {} stopped without finishing", id))
            })?;
        }
    }

    /// Number of executions known to the engine
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.entries.len()
    }
}

#[async_trait]
impl WorkflowEngine for InMemoryWorkflowEngine {
    async fn start_execution(&self, input: Value) -> Result<ExecutionId, CoreError> {
        let id = ExecutionId::generate();
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Running);

        {
            let mut executions = self.executions.write().await;
            executions.entries.insert(
                id.clone(),
                ExecutionEntry {
                    description: ExecutionDescription {
                        execution_id: id.clone(),
                        status: ExecutionStatus::Running,
                        started_at: Utc::now(),
                        stopped_at: None,
                        output: None,
                    },
                    events: Vec::new(),
                    status_rx,
                },
            );
        }

        let run = ExecutionRun {
            id: id.clone(),
            orchestrator: self.orchestrator.clone(),
            executions: self.executions.clone(),
            retry: self.config.retry,
            max_finished: self.config.max_finished_executions,
            status_tx,
        };
        tokio::spawn(run.drive(input));

        info!(execution_id = %id, "Execution started");
        Ok(id)
    }

    async fn describe_execution(&self, id: &ExecutionId) -> Result<ExecutionDescription, CoreError> {
        let executions = self.executions.read().await;
        executions
            .entries
            .get(id)
            .map(|entry| entry.description.clone())
            .ok_or_else(|| not_found(id))
    }

    async fn get_execution_history(
        &self,
        id: &ExecutionId,
        next_token: Option<String>,
    ) -> Result<HistoryPage, CoreError> {
        let offset = match next_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                CoreError::Validation(format!("Invalid history page token: {}", token))
            })?,
            None => 0,
        };

        let executions = self.executions.read().await;
        let entry = executions.entries.get(id).ok_or_else(|| not_found(id))?;
        let total = entry.events.len();
        let start = offset.min(total);
        let end = start.saturating_add(self.config.page_size).min(total);

        debug!(execution_id = %id, start, end, total, "Serving history page");
        Ok(HistoryPage {
            events: Some(entry.events[start..end].to_vec()),
            next_token: (end < total).then(|| end.to_string()),
        })
    }
}

fn not_found(id: &ExecutionId) -> CoreError {
    CoreError::HistoryNotFound(format!("Execution does not exist: {}", id))
}

/// One execution being driven on its own task
struct ExecutionRun {
    id: ExecutionId,
    orchestrator: Arc<ContextOrchestrator>,
    executions: Executions,
    retry: StepRetryPolicy,
    max_finished: usize,
    status_tx: watch::Sender<ExecutionStatus>,
}

impl ExecutionRun {
    async fn drive(self, input: Value) {
        self.record(
            EventType::Other("ExecutionStarted".to_string()),
            None,
            EventDetail {
                input: Some(redacted(&input)),
                ..Default::default()
            },
        )
        .await;

        let mut current = Some(State::START);
        let mut payload = input;

        while let Some(state) = current {
            self.record(
                entered_type(state),
                Some(state),
                EventDetail {
                    input: Some(redacted(&payload)),
                    ..Default::default()
                },
            )
            .await;

            match self.run_state(state, payload).await {
                Ok(Advance { next, output }) => {
                    self.record(
                        exited_type(state),
                        Some(state),
                        EventDetail {
                            output: Some(output.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                    current = next;
                    payload = output;
                }
                Err(err) => {
                    self.fail(state, err).await;
                    return;
                }
            }
        }

        self.record(
            EventType::Other("ExecutionSucceeded".to_string()),
            None,
            EventDetail {
                output: Some(payload.to_string()),
                ..Default::default()
            },
        )
        .await;
        self.finish(ExecutionStatus::Succeeded, Some(payload)).await;
        info!(execution_id = %self.id, "Execution succeeded");
    }

    async fn run_state(&self, state: State, input: Value) -> Result<Advance, CoreError> {
        let mut retries = 0u32;
        loop {
            match self.orchestrator.advance(state, input.clone()).await {
                Ok(advance) => return Ok(advance),
                Err(err) if err.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    let delay = self.retry.delay_for(retries);
                    warn!(
                        execution_id = %self.id,
                        state = %state,
                        retry = retries,
                        error = %err,
                        "Retrying state"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fail(&self, state: State, err: CoreError) {
        let error_type = err.kind().as_str();
        let cause = json!({
            "errorType": error_type,
            "errorMessage": err.to_string(),
        })
        .to_string();

        error!(execution_id = %self.id, state = %state, error = %err, "Execution failed");
        self.record(
            EventType::TaskFailed,
            Some(state),
            EventDetail {
                resource_type: Some(RESOURCE_TYPE.to_string()),
                error: Some(error_type.to_string()),
                cause: Some(cause.clone()),
                ..Default::default()
            },
        )
        .await;
        self.record(
            EventType::Other("ExecutionFailed".to_string()),
            None,
            EventDetail {
                error: Some(error_type.to_string()),
                cause: Some(cause),
                ..Default::default()
            },
        )
        .await;
        self.finish(ExecutionStatus::Failed, None).await;
    }

    async fn record(&self, event_type: EventType, state: Option<State>, detail: EventDetail) {
        let mut executions = self.executions.write().await;
        if let Some(entry) = executions.entries.get_mut(&self.id) {
            let event = WorkflowEvent::new(
                entry.events.len() as u64 + 1,
                event_type,
                state.map(|s| s.name().to_string()),
            )
            .with_detail(detail);
            entry.events.push(event);
        }
    }

    async fn finish(&self, status: ExecutionStatus, output: Option<Value>) {
        {
            let mut executions = self.executions.write().await;
            if let Some(entry) = executions.entries.get_mut(&self.id) {
                entry.description.status = status;
                entry.description.stopped_at = Some(Utc::now());
                entry.description.output = output;
            }
            executions.mark_finished(&self.id, self.max_finished);
        }
        // Waiters may all be gone; the status is already in the description
        let _ = self.status_tx.send(status);
    }
}

/// Serialized state input with the bearer token masked
fn redacted(input: &Value) -> String {
    match input.get("token") {
        Some(_) => {
            let mut masked = input.clone();
            masked["token"] = Value::String(REDACTED.to_string());
            masked.to_string()
        }
        None => input.to_string(),
    }
}

fn entered_type(state: State) -> EventType {
    match state.kind() {
        StateKind::Task => EventType::StateEntered,
        StateKind::Choice => EventType::Other("ChoiceStateEntered".to_string()),
        StateKind::Succeed => EventType::Other("SucceedStateEntered".to_string()),
    }
}

fn exited_type(state: State) -> EventType {
    match state.kind() {
        StateKind::Task => EventType::StateExited,
        StateKind::Choice => EventType::Other("ChoiceStateExited".to_string()),
        StateKind::Succeed => EventType::Other("SucceedStateExited".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_backoff() {
        let policy = StepRetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            exponential_backoff: true,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));

        let flat = StepRetryPolicy {
            exponential_backoff: false,
            ..policy
        };
        assert_eq!(flat.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn test_recorded_input_masks_token() {
        let recorded = redacted(&json!({"token": "secret-token", "other": 1}));
        let value: Value = serde_json::from_str(&recorded).unwrap();
        assert_eq!(value, json!({"token": REDACTED, "other": 1}));

        assert_eq!(redacted(&json!({"userId": "u1"})), json!({"userId": "u1"}).to_string());
    }

    #[test]
    fn test_finished_executions_are_capped() {
        let mut table = ExecutionTable::default();
        for n in 0..3 {
            let id = ExecutionId(format!("exec-{}", n));
            let (_, status_rx) = watch::channel(ExecutionStatus::Succeeded);
            table.entries.insert(
                id.clone(),
                ExecutionEntry {
                    description: ExecutionDescription {
                        execution_id: id.clone(),
                        status: ExecutionStatus::Succeeded,
                        started_at: Utc::now(),
                        stopped_at: Some(Utc::now()),
                        output: None,
                    },
                    events: Vec::new(),
                    status_rx,
                },
            );
            table.mark_finished(&id, 2);
        }

        assert_eq!(table.entries.len(), 2);
        assert!(!table.entries.contains_key(&ExecutionId("exec-0".to_string())));
        assert!(table.entries.contains_key(&ExecutionId("exec-2".to_string())));
    }

    #[test]
    fn test_event_types_by_state_kind() {
        assert_eq!(entered_type(State::CheckCache), EventType::StateEntered);
        assert_eq!(exited_type(State::UpdateContext), EventType::StateExited);
        assert_eq!(
            entered_type(State::IsCacheValid),
            EventType::Other("ChoiceStateEntered".to_string())
        );
        assert_eq!(
            entered_type(State::ContextUpdated),
            EventType::Other("SucceedStateEntered".to_string())
        );
    }
}
