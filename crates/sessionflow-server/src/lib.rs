//!
//! Sessionflow Server - HTTP service for per-user session contexts
//!
//! This crate wires the context workflow to its remote collaborators (a
//! GraphQL access source and a token introspection endpoint), runs it on the
//! local workflow engine and serves it over HTTP.

/// API module
pub mod api;

/// Server module
pub mod server;

/// Access source client module
pub mod access_source;

/// Token issuer client module
pub mod token;

/// Notification delivery module
pub mod notifier;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

// Re-export key types
pub use access_source::GraphQlAccessSource;
pub use config::ServiceConfig;
pub use error::{ServerError, ServerResult};
pub use notifier::{AccessSourceNotifier, DeadLetter, DeadLetterQueue, DlqStats, RetryPolicy, RetryingNotifier};
pub use server::ContextServer;
pub use token::IntrospectionTokenVerifier;

/// Build the server described by `config` and serve until shutdown
pub async fn run(config: ServiceConfig) -> ServerResult<()> {
    let server = ContextServer::from_config(config)?;
    server.run().await
}
