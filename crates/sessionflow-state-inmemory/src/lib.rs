//! In-memory backends for sessionflow
//!
//! This crate provides in-memory implementations of the collaborator traits
//! defined in sessionflow-core: a context store with TTL expiry and a local
//! workflow engine. It is useful for development, testing, and single-node
//! deployments where durable persistence is not required.

use std::sync::Arc;

use sessionflow_core::{
    AccessSource, Clock, Collaborators, ContextOrchestrator, NotificationSink, OrchestratorConfig,
    TokenVerifier,
};

pub mod repositories;
pub use repositories::InMemoryContextStore;

pub mod engine;
pub use engine::{
    EngineConfig, InMemoryWorkflowEngine, StepRetryPolicy, DEFAULT_MAX_FINISHED_EXECUTIONS,
    DEFAULT_PAGE_SIZE,
};

pub mod local;
pub use local::{RecordingSink, StaticAccessSource, StaticTokenVerifier};

/// A context workflow wired to an in-memory store and a local engine
pub struct InMemoryRuntime {
    /// The shared context store
    pub store: Arc<InMemoryContextStore>,
    /// The workflow definition
    pub orchestrator: Arc<ContextOrchestrator>,
    /// The engine running executions of the workflow
    pub engine: Arc<InMemoryWorkflowEngine>,
}

impl InMemoryRuntime {
    /// Build the runtime around the given external collaborators
    pub fn new(
        token_verifier: Arc<dyn TokenVerifier>,
        access_source: Arc<dyn AccessSource>,
        notification_sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        orchestrator_config: OrchestratorConfig,
        engine_config: EngineConfig,
    ) -> Self {
        let store = Arc::new(InMemoryContextStore::new(clock.clone()));
        let orchestrator = Arc::new(ContextOrchestrator::new(
            Collaborators {
                token_verifier,
                context_store: store.clone(),
                access_source,
                notification_sink,
                clock,
            },
            orchestrator_config,
        ));
        let engine = Arc::new(InMemoryWorkflowEngine::new(
            orchestrator.clone(),
            engine_config,
        ));

        Self {
            store,
            orchestrator,
            engine,
        }
    }
}
