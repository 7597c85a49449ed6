//! Orchestrator configuration.

use std::str::FromStr;
use std::time::Duration;

/// What `CreateOrder` reports when the cart could not be cleared after the
/// order was persisted.
///
/// Either way the order stays created and a `ClearCart` entry is queued in the
/// compensation log for the worker to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompensationPolicy {
    /// Report the order as created.
    #[default]
    Tolerate,
    /// Report the failed cart clear as an upstream error.
    Fail,
}

impl CompensationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationPolicy::Tolerate => "tolerate",
            CompensationPolicy::Fail => "fail",
        }
    }
}

impl FromStr for CompensationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tolerate" => Ok(CompensationPolicy::Tolerate),
            "fail" => Ok(CompensationPolicy::Fail),
            other => Err(format!(
                "unknown compensation policy '{other}' (expected 'tolerate' or 'fail')"
            )),
        }
    }
}

impl std::fmt::Display for CompensationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by the orchestrators and the compensation worker.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-request timeout for collaborator calls.
    pub collaborator_timeout: Duration,
    pub compensation_policy: CompensationPolicy,
    /// Upper bound on a request-path publish; slower publishes are deferred
    /// to the compensation log.
    pub publish_timeout: Duration,
    /// Attempts (including the inline one) before an entry is abandoned.
    pub max_compensation_attempts: u32,
    pub compensation_retry_interval: Duration,
    pub compensation_batch_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(10),
            compensation_policy: CompensationPolicy::default(),
            publish_timeout: Duration::from_secs(15),
            max_compensation_attempts: 10,
            compensation_retry_interval: Duration::from_secs(30),
            compensation_batch_size: 50,
        }
    }
}
