//! Event publication with a compensation-log fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{BrokerClient, BrokerError, Connector};
use chrono::Utc;
use serde::Serialize;
use store::{CompensationAction, CompensationLog, PendingCompensation};

/// Something that can deliver a JSON payload to a named queue.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> Result<(), BrokerError>;
}

#[async_trait]
impl<C: Connector> EventPublisher for BrokerClient<C> {
    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> Result<(), BrokerError> {
        self.publish_json(queue, payload).await
    }
}

/// Publishes events from the request path. A publish that fails or takes
/// longer than the timeout is written to the compensation log instead of
/// failing the request.
#[derive(Clone)]
pub struct Outbox {
    publisher: Arc<dyn EventPublisher>,
    log: Arc<dyn CompensationLog>,
    timeout: Duration,
}

impl Outbox {
    pub fn new(publisher: Arc<dyn EventPublisher>, log: Arc<dyn CompensationLog>, timeout: Duration) -> Self {
        Self {
            publisher,
            log,
            timeout,
        }
    }

    pub fn log(&self) -> &Arc<dyn CompensationLog> {
        &self.log
    }

    /// Publishes `payload` to `queue`. Returns true if it was sent now, false
    /// if it was deferred.
    pub async fn publish<T: Serialize + ?Sized>(&self, queue: &str, payload: &T) -> bool {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(queue, error = %e, "event payload not serializable, dropping");
                return false;
            }
        };

        let error = match tokio::time::timeout(self.timeout, self.publisher.publish(queue, &payload)).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("publish timed out after {:?}", self.timeout),
        };

        tracing::warn!(queue, error = %error, "publish failed, deferring to compensation log");
        self.defer(
            CompensationAction::Publish {
                queue: queue.to_string(),
                payload,
            },
            error,
        )
        .await;
        false
    }

    /// Records a follow-up action whose first attempt failed with `error`.
    pub async fn defer(&self, action: CompensationAction, error: String) {
        let kind = action.kind();
        let entry = PendingCompensation::after_failure(action, error, Utc::now());
        match self.log.record(&entry).await {
            Ok(()) => {
                metrics::gauge!("compensations_pending").increment(1.0);
                tracing::info!(id = %entry.id, kind, "compensation queued");
            }
            Err(e) => {
                tracing::error!(kind, error = %e, "could not record compensation, action is lost");
            }
        }
    }
}
