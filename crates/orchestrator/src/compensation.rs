//! Background retry of queued compensating actions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use store::{CompensationAction, CompensationLog};
use tokio::task::JoinHandle;

use crate::caller::Caller;
use crate::collaborators::CartClient;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::outbox::EventPublisher;

/// Counts from one pass over the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub completed: usize,
    pub retried: usize,
    pub abandoned: usize,
}

/// Retries pending entries of the compensation log until they succeed or
/// run out of attempts.
pub struct CompensationWorker {
    log: Arc<dyn CompensationLog>,
    cart: Arc<dyn CartClient>,
    publisher: Arc<dyn EventPublisher>,
    max_attempts: u32,
    interval: Duration,
    batch_size: usize,
}

impl CompensationWorker {
    pub fn new(
        log: Arc<dyn CompensationLog>,
        cart: Arc<dyn CartClient>,
        publisher: Arc<dyn EventPublisher>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            log,
            cart,
            publisher,
            max_attempts: config.max_compensation_attempts,
            interval: config.compensation_retry_interval,
            batch_size: config.compensation_batch_size,
        }
    }

    /// Makes one pass over the oldest pending entries.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<CompensationReport> {
        let mut report = CompensationReport::default();
        let entries = self.log.pending(self.batch_size).await?;

        for entry in entries {
            let now = Utc::now();
            match self.execute(&entry.action).await {
                Ok(()) => {
                    self.log.mark_completed(entry.id, now).await?;
                    tracing::info!(id = %entry.id, kind = entry.action.kind(), "compensation completed");
                    report.completed += 1;
                }
                Err(e) => {
                    let abandon = entry.attempts + 1 >= self.max_attempts;
                    self.log
                        .record_failure(entry.id, &e.to_string(), abandon, now)
                        .await?;
                    if abandon {
                        tracing::error!(
                            id = %entry.id,
                            kind = entry.action.kind(),
                            attempts = entry.attempts + 1,
                            error = %e,
                            "compensation abandoned"
                        );
                        report.abandoned += 1;
                    } else {
                        tracing::warn!(id = %entry.id, kind = entry.action.kind(), error = %e, "compensation retry failed");
                        report.retried += 1;
                    }
                }
            }
        }

        let pending = self.log.pending_count().await?;
        metrics::gauge!("compensations_pending").set(pending as f64);
        Ok(report)
    }

    async fn execute(&self, action: &CompensationAction) -> Result<()> {
        match action {
            CompensationAction::ClearCart { user_id, token } => {
                let caller = Caller::user(user_id.clone(), String::new(), token.clone());
                self.cart.clear_cart(&caller).await.map_err(OrchestratorError::from)
            }
            CompensationAction::Publish { queue, payload } => self
                .publisher
                .publish(queue, payload)
                .await
                .map_err(|e| OrchestratorError::Internal(e.to_string())),
        }
    }

    /// Runs [`run_once`](Self::run_once) on every tick of the retry interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report != CompensationReport::default() => {
                        tracing::info!(
                            completed = report.completed,
                            retried = report.retried,
                            abandoned = report.abandoned,
                            "compensation pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "compensation pass failed"),
                }
            }
        })
    }
}
