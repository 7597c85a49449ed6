//! Queue consumers.
//!
//! A [`Dispatcher`] maps queue names to typed [`MessageHandler`]s. Running it
//! spawns one pull loop per queue; each loop survives connection loss by
//! resubscribing once the client has reconnected.
//!
//! Settlement under [`AckMode::OnSuccess`]:
//!
//! | Outcome                                  | Action                               |
//! |------------------------------------------|--------------------------------------|
//! | handler succeeded                        | ack                                  |
//! | handler failed, retries left             | republish with retry count + 1, ack  |
//! | handler failed, retries exhausted        | publish to dead-letter queue, ack    |
//! | body not decodable / handler rejected    | publish to dead-letter queue, ack    |
//! | republish or dead-letter publish failed  | reject with requeue                  |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::client::BrokerClient;
use crate::config::{AckMode, RetryPolicy};
use crate::transport::{Connector, Delivery, MessageHeaders};

/// Why a handler did not process a message.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Transient failure; the message is worth retrying.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The message can never be processed; retrying is pointless.
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Processes messages of one type from one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Message: DeserializeOwned + Send;

    async fn handle(&self, message: Self::Message) -> Result<(), HandlerError>;
}

enum Failure {
    Decode(String),
    Handler(HandlerError),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Decode(e) => write!(f, "undecodable payload: {e}"),
            Failure::Handler(e) => write!(f, "{e}"),
        }
    }
}

#[async_trait]
trait RawHandler: Send + Sync {
    async fn handle_raw(&self, body: &[u8]) -> Result<(), Failure>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: MessageHandler> RawHandler for Typed<H> {
    async fn handle_raw(&self, body: &[u8]) -> Result<(), Failure> {
        let message: H::Message =
            serde_json::from_slice(body).map_err(|e| Failure::Decode(e.to_string()))?;
        self.0.handle(message).await.map_err(Failure::Handler)
    }
}

/// Routes deliveries from named queues to their handlers.
pub struct Dispatcher {
    routes: BTreeMap<String, Arc<dyn RawHandler>>,
    ack_mode: AckMode,
}

impl Dispatcher {
    pub fn new(ack_mode: AckMode) -> Self {
        Self {
            routes: BTreeMap::new(),
            ack_mode,
        }
    }

    /// Registers `handler` for `queue`, replacing any previous handler.
    pub fn register<H: MessageHandler>(&mut self, queue: impl Into<String>, handler: H) -> &mut Self {
        let queue = queue.into();
        if self.routes.insert(queue.clone(), Arc::new(Typed(handler))).is_some() {
            tracing::warn!(queue = %queue, "replacing existing handler");
        }
        self
    }

    /// Queue names with a registered handler.
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn ack_mode(&self) -> &AckMode {
        &self.ack_mode
    }

    /// Spawns one pull loop per registered queue.
    pub fn spawn<C: Connector>(self, client: BrokerClient<C>) -> DispatcherHandle {
        let ack_mode = Arc::new(self.ack_mode);
        let tasks = self
            .routes
            .into_iter()
            .map(|(queue, handler)| {
                let worker = QueueWorker {
                    queue,
                    handler,
                    ack_mode: Arc::clone(&ack_mode),
                    client: client.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        DispatcherHandle { tasks }
    }
}

/// Running consumer loops.
pub struct DispatcherHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stops all consumer loops. Unacked deliveries return to their queues
    /// when the connection closes.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

struct QueueWorker<C: Connector> {
    queue: String,
    handler: Arc<dyn RawHandler>,
    ack_mode: Arc<AckMode>,
    client: BrokerClient<C>,
}

impl<C: Connector> QueueWorker<C> {
    async fn run(self) {
        let backoff = self.client.config().reconnect_backoff;
        loop {
            match self.client.consume(&self.queue).await {
                Ok(mut deliveries) => {
                    tracing::info!(queue = %self.queue, "consumer subscribed");
                    while let Some(item) = deliveries.next().await {
                        match item {
                            Ok(delivery) => self.process(delivery).await,
                            Err(e) => {
                                tracing::warn!(queue = %self.queue, error = %e, "delivery stream failed");
                                break;
                            }
                        }
                    }
                    tracing::warn!(queue = %self.queue, "consumer stream ended, resubscribing");
                }
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "consume failed, retrying");
                }
            }
            tokio::time::sleep(backoff).await;
        }
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(queue = %self.queue, retry_count = delivery.headers.retry_count, redelivered = delivery.redelivered)
    )]
    async fn process(&self, delivery: Delivery) {
        let result = self.handler.handle_raw(&delivery.body).await;
        let outcome = match (&result, self.ack_mode.as_ref()) {
            (Ok(()), _) => {
                self.ack(&delivery).await;
                "processed"
            }
            (Err(failure), AckMode::Always) => {
                tracing::error!(error = %failure, "handler failed, acknowledging anyway");
                self.ack(&delivery).await;
                "dropped"
            }
            (Err(failure), AckMode::OnSuccess(policy)) => {
                self.settle_failure(&delivery, failure, policy).await
            }
        };
        metrics::counter!("consumer_messages_total", "queue" => self.queue.clone(), "outcome" => outcome)
            .increment(1);
    }

    async fn settle_failure(&self, delivery: &Delivery, failure: &Failure, policy: &RetryPolicy) -> &'static str {
        let retry_count = delivery.headers.retry_count;
        let retryable = matches!(failure, Failure::Handler(HandlerError::Failed(_)));

        let (target, headers, outcome) = if retryable && retry_count < policy.max_retries {
            tracing::warn!(error = %failure, attempt = retry_count + 1, "handler failed, scheduling retry");
            (
                self.queue.clone(),
                MessageHeaders {
                    retry_count: retry_count + 1,
                },
                "retried",
            )
        } else {
            let dead_letter = policy.dead_letter_queue(&self.queue);
            tracing::error!(error = %failure, dead_letter = %dead_letter, "message dead-lettered");
            (dead_letter, delivery.headers, "dead_lettered")
        };

        match self
            .client
            .publish_with_headers(&target, &delivery.body, headers)
            .await
        {
            Ok(()) => {
                self.ack(delivery).await;
                outcome
            }
            Err(e) => {
                tracing::error!(error = %e, target = %target, "could not re-route message, requeueing");
                if let Err(e) = delivery.reject(true).await {
                    tracing::warn!(error = %e, "reject failed, broker will redeliver");
                }
                "requeued"
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            tracing::warn!(error = %e, "ack failed, message may be redelivered");
        }
    }
}
