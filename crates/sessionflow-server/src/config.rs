//! Configuration for the sessionflow server
//!
//! This module contains the configuration type and its loading from
//! environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use sessionflow_core::{CacheValidityPolicy, OrchestratorConfig};
use sessionflow_monitoring::MonitoringConfig;
use sessionflow_state_inmemory::{EngineConfig, StepRetryPolicy};

use crate::error::{ServerError, ServerResult};

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Log filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,

    /// GraphQL endpoint of the access source
    #[serde(default)]
    pub access_api_url: String,

    /// API key sent to the access source
    #[serde(default)]
    pub access_api_key: Option<String>,

    /// Token introspection endpoint of the token issuer
    #[serde(default)]
    pub token_introspection_url: String,

    /// Longest a context may live after it was computed
    #[serde(default = "default_max_context_age_ms")]
    pub max_context_age_ms: u64,

    /// Longest a session may be idle
    #[serde(default = "default_max_inactivity_ms")]
    pub max_inactivity_ms: u64,

    /// Longest an entitlement may go unverified
    #[serde(default = "default_max_verification_age_ms")]
    pub max_verification_age_ms: u64,

    /// Lookahead before expiry that forces a refresh
    #[serde(default = "default_refresh_threshold_ms")]
    pub refresh_threshold_ms: u64,

    /// Lifetime of a freshly fetched context
    #[serde(default = "default_context_lifetime_ms")]
    pub context_lifetime_ms: u64,

    /// Notification retries before dead-lettering
    #[serde(default = "default_notify_max_retries")]
    pub notify_max_retries: u32,

    /// Delay between notification retries
    #[serde(default = "default_notify_retry_delay_ms")]
    pub notify_retry_delay_ms: u64,

    /// Dead-letter queue capacity
    #[serde(default = "default_dlq_capacity")]
    pub dlq_capacity: usize,

    /// Events per history page served by the local engine
    #[serde(default = "default_history_page_size")]
    pub history_page_size: usize,

    /// Finished executions the local engine keeps for status queries
    #[serde(default = "default_max_finished_executions")]
    pub max_finished_executions: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_context_age_ms() -> u64 {
    8 * 60 * 60 * 1000
}

fn default_max_inactivity_ms() -> u64 {
    30 * 60 * 1000
}

fn default_max_verification_age_ms() -> u64 {
    15 * 60 * 1000
}

fn default_refresh_threshold_ms() -> u64 {
    5 * 60 * 1000
}

fn default_context_lifetime_ms() -> u64 {
    8 * 60 * 60 * 1000
}

fn default_notify_max_retries() -> u32 {
    2
}

fn default_notify_retry_delay_ms() -> u64 {
    200
}

fn default_dlq_capacity() -> usize {
    1000
}

fn default_history_page_size() -> usize {
    sessionflow_state_inmemory::DEFAULT_PAGE_SIZE
}

fn default_max_finished_executions() -> usize {
    sessionflow_state_inmemory::DEFAULT_MAX_FINISHED_EXECUTIONS
}

/// Parse `raw` into `target`, warning and keeping the old value on failure
fn parse_into<T: FromStr>(key: &str, raw: String, target: &mut T) {
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!("Invalid {} value: {}", key, raw),
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables over defaults
    pub fn load() -> ServerResult<Self> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn load_from<F>(lookup: F) -> ServerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("SERVER_PORT") {
            parse_into("SERVER_PORT", port, &mut config.port);
        }

        if let Some(host) = lookup("SERVER_HOST") {
            config.bind_address = host;
        }

        config.apply_logging(&lookup);

        if let Some(url) = lookup("ACCESS_API_URL") {
            config.access_api_url = url;
        }

        if let Some(key) = lookup("ACCESS_API_KEY") {
            config.access_api_key = Some(key).filter(|k| !k.is_empty());
        }

        if let Some(url) = lookup("TOKEN_INTROSPECTION_URL") {
            config.token_introspection_url = url;
        }

        if let Some(raw) = lookup("MAX_CONTEXT_AGE_MS") {
            parse_into("MAX_CONTEXT_AGE_MS", raw, &mut config.max_context_age_ms);
        }

        if let Some(raw) = lookup("MAX_INACTIVITY_MS") {
            parse_into("MAX_INACTIVITY_MS", raw, &mut config.max_inactivity_ms);
        }

        if let Some(raw) = lookup("MAX_VERIFICATION_AGE_MS") {
            parse_into("MAX_VERIFICATION_AGE_MS", raw, &mut config.max_verification_age_ms);
        }

        if let Some(raw) = lookup("REFRESH_THRESHOLD_MS") {
            parse_into("REFRESH_THRESHOLD_MS", raw, &mut config.refresh_threshold_ms);
        }

        if let Some(raw) = lookup("CONTEXT_LIFETIME_MS") {
            parse_into("CONTEXT_LIFETIME_MS", raw, &mut config.context_lifetime_ms);
        }

        if let Some(raw) = lookup("NOTIFY_MAX_RETRIES") {
            parse_into("NOTIFY_MAX_RETRIES", raw, &mut config.notify_max_retries);
        }

        if let Some(raw) = lookup("NOTIFY_RETRY_DELAY_MS") {
            parse_into("NOTIFY_RETRY_DELAY_MS", raw, &mut config.notify_retry_delay_ms);
        }

        if let Some(raw) = lookup("DLQ_CAPACITY") {
            parse_into("DLQ_CAPACITY", raw, &mut config.dlq_capacity);
        }

        if let Some(raw) = lookup("HISTORY_PAGE_SIZE") {
            parse_into("HISTORY_PAGE_SIZE", raw, &mut config.history_page_size);
        }

        if let Some(raw) = lookup("MAX_FINISHED_EXECUTIONS") {
            parse_into("MAX_FINISHED_EXECUTIONS", raw, &mut config.max_finished_executions);
        }

        config.validate()?;

        if config.access_api_key.is_none() {
            warn!("No ACCESS_API_KEY provided - access source requests will be unsigned!");
        }

        info!("Loaded service configuration");
        Ok(config)
    }

    /// Logging setup from `LOG_LEVEL` and `LOG_JSON` only.
    ///
    /// Needs no other variable, so logging can be installed before the rest
    /// of the configuration is loaded and its warnings are not lost.
    pub fn monitoring_from_env() -> MonitoringConfig {
        Self::monitoring_from(|key| env::var(key).ok())
    }

    /// Logging setup from an arbitrary variable lookup
    pub fn monitoring_from<F>(lookup: F) -> MonitoringConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_logging(&lookup);
        config.monitoring_config()
    }

    fn apply_logging<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(log_level) = lookup("LOG_LEVEL") {
            self.log_level = log_level;
        }

        if let Some(log_json) = lookup("LOG_JSON") {
            self.log_json = log_json.eq_ignore_ascii_case("true") || log_json == "1";
        }
    }

    /// Check the configuration for values the service cannot run with
    pub fn validate(&self) -> ServerResult<()> {
        if self.access_api_url.trim().is_empty() {
            return Err(ServerError::ConfigError(
                "Access API URL is required".to_string(),
            ));
        }

        if self.token_introspection_url.trim().is_empty() {
            return Err(ServerError::ConfigError(
                "Token introspection URL is required".to_string(),
            ));
        }

        if self.history_page_size == 0 {
            return Err(ServerError::ConfigError(
                "History page size must be positive".to_string(),
            ));
        }

        if self.refresh_threshold_ms >= self.context_lifetime_ms {
            return Err(ServerError::ConfigError(format!(
                "Refresh threshold ({}ms) must be shorter than the context lifetime ({}ms)",
                self.refresh_threshold_ms, self.context_lifetime_ms
            )));
        }

        Ok(())
    }

    /// Cache validity thresholds
    pub fn policy(&self) -> CacheValidityPolicy {
        CacheValidityPolicy {
            max_context_age: Duration::from_millis(self.max_context_age_ms),
            max_inactivity: Duration::from_millis(self.max_inactivity_ms),
            max_verification_age: Duration::from_millis(self.max_verification_age_ms),
            refresh_threshold: Duration::from_millis(self.refresh_threshold_ms),
        }
    }

    /// Workflow tunables
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            policy: self.policy(),
            context_lifetime: Duration::from_millis(self.context_lifetime_ms),
        }
    }

    /// Local engine tunables
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            page_size: self.history_page_size,
            max_finished_executions: self.max_finished_executions,
            retry: StepRetryPolicy::default(),
        }
    }

    /// Logging setup
    pub fn monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            service_name: "sessionflow-server".to_string(),
            log_filter: self.log_level.clone(),
            json: self.log_json,
        }
    }

    /// Delay between notification retries
    pub fn notify_retry_delay(&self) -> Duration {
        Duration::from_millis(self.notify_retry_delay_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            log_level: default_log_level(),
            log_json: false,
            access_api_url: String::new(),
            access_api_key: None,
            token_introspection_url: String::new(),
            max_context_age_ms: default_max_context_age_ms(),
            max_inactivity_ms: default_max_inactivity_ms(),
            max_verification_age_ms: default_max_verification_age_ms(),
            refresh_threshold_ms: default_refresh_threshold_ms(),
            context_lifetime_ms: default_context_lifetime_ms(),
            notify_max_retries: default_notify_max_retries(),
            notify_retry_delay_ms: default_notify_retry_delay_ms(),
            dlq_capacity: default_dlq_capacity(),
            history_page_size: default_history_page_size(),
            max_finished_executions: default_max_finished_executions(),
        }
    }
}
