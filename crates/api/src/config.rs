//! Application configuration loaded from environment variables.

use std::time::Duration;

use broker::{AckMode, BrokerConfig, ConfirmMode, RetryPolicy};
use orchestrator::{CompensationPolicy, OrchestratorConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `JWT_SECRET`: HS256 token secret, required
/// - `CART_SERVICE_URL`, `AUTH_SERVICE_URL`, `ORDER_SERVICE_URL`: collaborators
/// - `AMQP_SERVER_URL`, `DATABASE_URL`: unset selects the in-memory backends
/// - broker, consumer and compensation tuning, see the field docs
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub jwt_secret: String,
    pub cart_service_url: String,
    pub auth_service_url: String,
    /// `None` answers payment-side order lookups from the local store.
    pub order_service_url: Option<String>,
    pub collaborator_timeout: Duration,
    /// `None` runs against an in-process broker.
    pub amqp_url: Option<String>,
    pub reconnect_backoff: Duration,
    pub confirm_timeout: Duration,
    pub confirm_mode: ConfirmMode,
    /// `false` selects the legacy acknowledge-always behaviour.
    pub ack_on_success: bool,
    pub consumer_max_retries: u32,
    /// `None` keeps orders and payments in memory.
    pub database_url: Option<String>,
    pub compensation_policy: CompensationPolicy,
    pub compensation_retry_interval: Duration,
    pub compensation_max_attempts: u32,
    pub publish_timeout: Duration,
    pub run_consumers: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value
    /// if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match var(name) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| ConfigError::Invalid {
                        var: name,
                        reason: e.to_string(),
                    }),
                None => Ok(default),
            }
        };
        let number = |name: &'static str, default: u32| -> Result<u32, ConfigError> {
            match var(name) {
                Some(v) => v.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                    var: name,
                    reason: e.to_string(),
                }),
                None => Ok(default),
            }
        };

        let log_format = match var("LOG_FORMAT").map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    reason: format!("unknown format '{other}'"),
                });
            }
        };

        let ack_on_success = match var("CONSUMER_ACK_MODE").map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("on-success") => true,
            Some("always") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "CONSUMER_ACK_MODE",
                    reason: format!("unknown ack mode '{other}'"),
                });
            }
        };

        let confirm_mode = match var("BROKER_CONFIRM_MODE") {
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                var: "BROKER_CONFIRM_MODE",
                reason,
            })?,
            None => defaults.confirm_mode,
        };

        let compensation_policy = match var("COMPENSATION_POLICY") {
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                var: "COMPENSATION_POLICY",
                reason,
            })?,
            None => defaults.compensation_policy,
        };

        let run_consumers = match var("RUN_CONSUMERS").map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None => defaults.run_consumers,
            Some("1" | "true" | "yes") => true,
            Some("0" | "false" | "no") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "RUN_CONSUMERS",
                    reason: format!("expected a boolean, got '{other}'"),
                });
            }
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            jwt_secret: var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            cart_service_url: var("CART_SERVICE_URL").unwrap_or(defaults.cart_service_url),
            auth_service_url: var("AUTH_SERVICE_URL").unwrap_or(defaults.auth_service_url),
            order_service_url: var("ORDER_SERVICE_URL"),
            collaborator_timeout: secs("COLLABORATOR_TIMEOUT_SECS", defaults.collaborator_timeout)?,
            amqp_url: var("AMQP_SERVER_URL"),
            reconnect_backoff: secs("BROKER_RECONNECT_BACKOFF_SECS", defaults.reconnect_backoff)?,
            confirm_timeout: secs("BROKER_CONFIRM_TIMEOUT_SECS", defaults.confirm_timeout)?,
            confirm_mode,
            ack_on_success,
            consumer_max_retries: number("CONSUMER_MAX_RETRIES", defaults.consumer_max_retries)?,
            database_url: var("DATABASE_URL"),
            compensation_policy,
            compensation_retry_interval: secs(
                "COMPENSATION_RETRY_INTERVAL_SECS",
                defaults.compensation_retry_interval,
            )?,
            compensation_max_attempts: number("COMPENSATION_MAX_ATTEMPTS", defaults.compensation_max_attempts)?,
            publish_timeout: secs("EVENT_PUBLISH_TIMEOUT_SECS", defaults.publish_timeout)?,
            run_consumers,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            reconnect_backoff: self.reconnect_backoff,
            confirm_timeout: self.confirm_timeout,
            confirm_mode: self.confirm_mode,
            ..BrokerConfig::default()
        }
    }

    pub fn ack_mode(&self) -> AckMode {
        if self.ack_on_success {
            AckMode::OnSuccess(RetryPolicy {
                max_retries: self.consumer_max_retries,
                ..RetryPolicy::default()
            })
        } else {
            AckMode::Always
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            collaborator_timeout: self.collaborator_timeout,
            compensation_policy: self.compensation_policy,
            publish_timeout: self.publish_timeout,
            max_compensation_attempts: self.compensation_max_attempts,
            compensation_retry_interval: self.compensation_retry_interval,
            ..OrchestratorConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let broker = BrokerConfig::default();
        let orchestrator = OrchestratorConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            jwt_secret: String::new(),
            cart_service_url: "http://localhost:3002".to_string(),
            auth_service_url: "http://localhost:3001".to_string(),
            order_service_url: None,
            collaborator_timeout: orchestrator.collaborator_timeout,
            amqp_url: None,
            reconnect_backoff: broker.reconnect_backoff,
            confirm_timeout: broker.confirm_timeout,
            confirm_mode: broker.confirm_mode,
            ack_on_success: true,
            consumer_max_retries: RetryPolicy::default().max_retries,
            database_url: None,
            compensation_policy: orchestrator.compensation_policy,
            compensation_retry_interval: orchestrator.compensation_retry_interval,
            compensation_max_attempts: orchestrator.max_compensation_attempts,
            publish_timeout: orchestrator.publish_timeout,
            run_consumers: true,
        }
    }
}
