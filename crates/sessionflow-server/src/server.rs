//! Server implementation
//!
//! `ContextServer` owns the wired workflow, the local engine running it and
//! the notification dead-letter queue, and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use sessionflow_core::{
    AccessSource, Clock, ContextOrchestrator, ExecutionStatusService, NotificationSink,
    SystemClock, TokenVerifier,
};
use sessionflow_monitoring::LogExt;
use sessionflow_state_inmemory::{InMemoryContextStore, InMemoryRuntime, InMemoryWorkflowEngine};

use crate::access_source::GraphQlAccessSource;
use crate::config::ServiceConfig;
use crate::error::{ServerError, ServerResult};
use crate::notifier::{AccessSourceNotifier, DeadLetterQueue, RetryPolicy, RetryingNotifier};
use crate::token::IntrospectionTokenVerifier;

const STORE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Session-context HTTP server
pub struct ContextServer {
    config: ServiceConfig,
    store: Arc<InMemoryContextStore>,
    orchestrator: Arc<ContextOrchestrator>,
    engine: Arc<InMemoryWorkflowEngine>,
    status: ExecutionStatusService,
    dead_letters: Arc<DeadLetterQueue>,
}

impl ContextServer {
    /// Create a server around an already wired runtime
    pub fn new(
        config: ServiceConfig,
        runtime: InMemoryRuntime,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        let InMemoryRuntime {
            store,
            orchestrator,
            engine,
        } = runtime;

        Self {
            config,
            store,
            orchestrator,
            status: ExecutionStatusService::new(engine.clone()),
            engine,
            dead_letters,
        }
    }

    /// Wire the remote collaborators named by `config`
    pub fn from_config(config: ServiceConfig) -> ServerResult<Self> {
        config.validate()?;

        let access_source: Arc<dyn AccessSource> = Arc::new(GraphQlAccessSource::new(
            config.access_api_url.clone(),
            config.access_api_key.clone(),
        ));
        let token_verifier: Arc<dyn TokenVerifier> = Arc::new(IntrospectionTokenVerifier::new(
            config.token_introspection_url.clone(),
        ));

        let dead_letters = Arc::new(DeadLetterQueue::new(config.dlq_capacity));
        let notification_sink: Arc<dyn NotificationSink> = Arc::new(RetryingNotifier::new(
            Arc::new(AccessSourceNotifier::new(access_source.clone())),
            RetryPolicy {
                max_retries: config.notify_max_retries,
                retry_delay: config.notify_retry_delay(),
            },
            dead_letters.clone(),
        ));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let runtime = InMemoryRuntime::new(
            token_verifier,
            access_source,
            notification_sink,
            clock,
            config.orchestrator_config(),
            config.engine_config(),
        );

        Ok(Self::new(config, runtime, dead_letters))
    }

    /// The server configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The context store shared by all executions
    pub fn store(&self) -> &Arc<InMemoryContextStore> {
        &self.store
    }

    /// The workflow, for inline runs
    pub fn orchestrator(&self) -> &ContextOrchestrator {
        &self.orchestrator
    }

    /// The local engine
    pub fn engine(&self) -> &Arc<InMemoryWorkflowEngine> {
        &self.engine
    }

    /// Execution start and progress reports
    pub fn status(&self) -> &ExecutionStatusService {
        &self.status
    }

    /// Undeliverable notifications
    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// Bind the configured address and serve until ctrl-c
    pub async fn run(self) -> ServerResult<()> {
        info!("Starting sessionflow server");

        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| {
                ServerError::ConfigError(format!(
                    "Invalid bind address {}:{}: {}",
                    self.config.bind_address, self.config.port, e
                ))
            })?;

        let sweeper = spawn_store_sweeper(self.store.clone(), STORE_SWEEP_INTERVAL);
        let app = crate::api::build_router(Arc::new(self));

        let listener = TcpListener::bind(addr)
            .await
            .log_err("Failed to bind listener")?;
        let addr = listener.local_addr()?;
        info!("Listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .log_err("Server stopped with an error")?;

        sweeper.abort();
        info!("Server stopped");
        Ok(())
    }
}

/// Periodically drop contexts whose TTL has elapsed
fn spawn_store_sweeper(
    store: Arc<InMemoryContextStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired().await;
            debug!(purged, "Context store sweep finished");
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
