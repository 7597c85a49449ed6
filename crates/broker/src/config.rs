//! Broker client and consumer configuration.

use std::str::FromStr;
use std::time::Duration;

/// How a publish treats a delivery confirmation that never arrives.
///
/// A broker that explicitly rejects a message is always a failure. The two
/// modes only differ in how they treat silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    /// A confirmation timeout fails the attempt and triggers the single
    /// reconnect-and-resend cycle; a second timeout fails the publish.
    Strict,

    /// A confirmation timeout is reported as success. Messages can be lost
    /// if the broker dies before persisting them.
    #[default]
    Relaxed,
}

impl ConfirmMode {
    /// Returns the mode name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmMode::Strict => "strict",
            ConfirmMode::Relaxed => "relaxed",
        }
    }
}

impl FromStr for ConfirmMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ConfirmMode::Strict),
            "relaxed" => Ok(ConfirmMode::Relaxed),
            other => Err(format!("unknown confirm mode '{other}'")),
        }
    }
}

impl std::fmt::Display for ConfirmMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection and publish settings for a [`crate::BrokerClient`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Fixed delay between connection attempts.
    pub reconnect_backoff: Duration,

    /// How long a publish waits for the broker's delivery confirmation.
    pub confirm_timeout: Duration,

    /// How a missing confirmation is treated.
    pub confirm_mode: ConfirmMode,

    /// Upper bound on consecutive connection attempts. `None` retries forever.
    pub max_connect_attempts: Option<u32>,

    /// Unacknowledged deliveries allowed in flight per consumer.
    pub prefetch: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
            confirm_timeout: Duration::from_secs(5),
            confirm_mode: ConfirmMode::default(),
            max_connect_attempts: None,
            prefetch: 1,
        }
    }
}

/// Redelivery policy for failed handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How many times a failed message is redelivered before dead-lettering.
    pub max_retries: u32,

    /// Suffix appended to the source queue name to form the dead-letter queue.
    pub dead_letter_suffix: String,
}

impl RetryPolicy {
    /// Returns the dead-letter queue name for `queue`.
    pub fn dead_letter_queue(&self, queue: &str) -> String {
        format!("{queue}{}", self.dead_letter_suffix)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            dead_letter_suffix: ".dead-letter".to_string(),
        }
    }
}

/// When a consumer acknowledges a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge after the handler returns, whatever it returned.
    ///
    /// Handler failures are logged and the message is gone. Kept only to
    /// reproduce the behaviour of older consumers.
    Always,

    /// Acknowledge only on success; retry and then dead-letter failures.
    OnSuccess(RetryPolicy),
}

impl Default for AckMode {
    fn default() -> Self {
        AckMode::OnSuccess(RetryPolicy::default())
    }
}
