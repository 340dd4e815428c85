//! Context workflow definition
//!
//! `ValidateToken -> CheckCache -> IsCacheValid -> {UpdateContext |
//! FetchProductAccess -> UpdateContext} -> ContextUpdated`
//!
//! `ContextUpdated` is the workflow's `Succeed` state: it has
//! [`StateKind::Succeed`] and ends the execution with its input as output.
//!
//! The orchestrator holds no memory across states: everything a state needs
//! arrives as its JSON input, so an engine can resume or retry any single
//! state by replaying its input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::steps::{
    CheckCacheStep, FetchProductAccessStep, StepHandler, UpdateContextStep, ValidateTokenStep,
    DEFAULT_CONTEXT_LIFETIME,
};
use crate::domain::policy::CacheValidityPolicy;
use crate::domain::repository::{AccessSource, ContextStore, NotificationSink, TokenVerifier};
use crate::types::Clock;
use crate::CoreError;

/// Kind of a workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    /// Calls a step handler
    Task,
    /// Branches on its input
    Choice,
    /// Terminal success
    Succeed,
}

/// States of the context workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Verify the bearer token
    ValidateToken,
    /// Look up and evaluate the cached context
    CheckCache,
    /// Branch on `cacheValid`
    IsCacheValid,
    /// Recompute entitlements
    FetchProductAccess,
    /// Persist and notify
    UpdateContext,
    /// Terminal `Succeed` state
    ContextUpdated,
}

impl State {
    /// Entry state of every execution
    pub const START: State = State::ValidateToken;

    /// Every state, in definition order
    pub const ALL: [State; 6] = [
        State::ValidateToken,
        State::CheckCache,
        State::IsCacheValid,
        State::FetchProductAccess,
        State::UpdateContext,
        State::ContextUpdated,
    ];

    /// State name as recorded in history
    pub fn name(&self) -> &'static str {
        match self {
            State::ValidateToken => "ValidateToken",
            State::CheckCache => "CheckCache",
            State::IsCacheValid => "IsCacheValid",
            State::FetchProductAccess => "FetchProductAccess",
            State::UpdateContext => "UpdateContext",
            State::ContextUpdated => "ContextUpdated",
        }
    }

    /// Look a state up by its recorded name
    pub fn from_name(name: &str) -> Option<State> {
        State::ALL.iter().copied().find(|state| state.name() == name)
    }

    /// Kind of the state
    pub fn kind(&self) -> StateKind {
        match self {
            State::IsCacheValid => StateKind::Choice,
            State::ContextUpdated => StateKind::Succeed,
            _ => StateKind::Task,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of running one state
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    /// Next state, `None` once the terminal state has run
    pub next: Option<State>,
    /// Output of the state, input of the next one
    pub output: Value,
}

/// Tunables of the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Cache validity thresholds
    pub policy: CacheValidityPolicy,
    /// Lifetime of a freshly fetched context
    pub context_lifetime: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: CacheValidityPolicy::default(),
            context_lifetime: DEFAULT_CONTEXT_LIFETIME,
        }
    }
}

/// External collaborators the workflow is wired to
#[derive(Clone)]
pub struct Collaborators {
    /// Token issuer
    pub token_verifier: Arc<dyn TokenVerifier>,
    /// Context store
    pub context_store: Arc<dyn ContextStore>,
    /// Access source
    pub access_source: Arc<dyn AccessSource>,
    /// Notification sink
    pub notification_sink: Arc<dyn NotificationSink>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// The context workflow
pub struct ContextOrchestrator {
    validate_token: ValidateTokenStep,
    check_cache: CheckCacheStep,
    fetch_product_access: FetchProductAccessStep,
    update_context: UpdateContextStep,
}

impl ContextOrchestrator {
    /// Wire the workflow to its collaborators
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig) -> Self {
        let Collaborators {
            token_verifier,
            context_store,
            access_source,
            notification_sink,
            clock,
        } = collaborators;

        Self {
            validate_token: ValidateTokenStep::new(token_verifier),
            check_cache: CheckCacheStep::new(context_store.clone(), config.policy, clock.clone()),
            fetch_product_access: FetchProductAccessStep::new(
                access_source,
                clock.clone(),
                config.context_lifetime,
            ),
            update_context: UpdateContextStep::new(context_store, notification_sink, clock),
        }
    }

    /// Run exactly one state on its JSON input
    #[instrument(skip_all, fields(state = %state))]
    pub async fn advance(&self, state: State, input: Value) -> Result<Advance, CoreError> {
        match state {
            State::ValidateToken => run_task(&self.validate_token, input, State::CheckCache).await,
            State::CheckCache => run_task(&self.check_cache, input, State::IsCacheValid).await,
            State::IsCacheValid => {
                let cache_valid = input
                    .get("cacheValid")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let next = if cache_valid {
                    State::UpdateContext
                } else {
                    State::FetchProductAccess
                };
                debug!(cache_valid, next = %next, "Choice evaluated");
                Ok(Advance {
                    next: Some(next),
                    output: input,
                })
            }
            State::FetchProductAccess => {
                run_task(&self.fetch_product_access, input, State::UpdateContext).await
            }
            State::UpdateContext => run_task(&self.update_context, input, State::ContextUpdated).await,
            State::ContextUpdated => Ok(Advance {
                next: None,
                output: input,
            }),
        }
    }

    /// Run from `state` until the terminal state, returning the final output
    pub async fn execute_from(&self, state: State, input: Value) -> Result<Value, CoreError> {
        let mut current = Some(state);
        let mut payload = input;

        while let Some(state) = current {
            let advance = self.advance(state, payload).await?;
            current = advance.next;
            payload = advance.output;
        }

        Ok(payload)
    }

    /// Run a whole execution from `ValidateToken`
    pub async fn execute(&self, input: Value) -> Result<Value, CoreError> {
        self.execute_from(State::START, input).await
    }
}

async fn run_task<H>(handler: &H, input: Value, next: State) -> Result<Advance, CoreError>
where
    H: StepHandler,
{
    let typed: H::Input = serde_json::from_value(input).map_err(|err| {
        CoreError::Validation(format!("Invalid input for {}: {}", handler.state(), err))
    })?;
    let output = handler.handle(typed).await?;

    Ok(Advance {
        next: Some(next),
        output: serde_json::to_value(output)?,
    })
}
