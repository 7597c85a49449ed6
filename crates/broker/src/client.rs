//! The broker client: one supervised connection, one channel, confirmed publishes.
//!
//! ```text
//!                  connect ok
//!  Disconnected ──► Connecting ──────────► Connected
//!       ▲               │ fail: sleep,          │
//!       │               └─ retry ◄──┘           │ close signal / failed publish
//!       └───────────────────────────────────────┘
//! ```
//!
//! All connection state lives in a single slot behind one mutex, so at most
//! one connect attempt runs at a time and concurrent callers wait for it
//! instead of racing to replace the channel. Every successful connect bumps a
//! generation counter; teardown requests carry the generation they observed
//! and are ignored once a newer connection exists.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::{BrokerConfig, ConfirmMode};
use crate::error::{BrokerError, Result};
use crate::transport::{Channel, CloseSignal, Confirmation, Connector, DeliveryStream, MessageHeaders};

/// Observable connection state of a [`BrokerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct Slot<Ch> {
    channel: Option<Ch>,
    generation: u64,
    declared: HashSet<String>,
}

struct Inner<C: Connector> {
    connector: C,
    config: BrokerConfig,
    slot: Mutex<Slot<C::Channel>>,
    state: watch::Sender<ConnectionState>,
}

/// Resets the state to `Disconnected` if a connect is abandoned midway,
/// e.g. when the caller's future is dropped during backoff.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<ConnectionState>,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }
}

/// Outcome of a single publish attempt.
enum Attempt {
    Confirmed,
    Nacked,
    TimedOut,
    Failed(BrokerError),
}

impl Attempt {
    fn describe(&self) -> String {
        match self {
            Attempt::Confirmed => "confirmed".to_string(),
            Attempt::Nacked => "nacked".to_string(),
            Attempt::TimedOut => "confirmation timed out".to_string(),
            Attempt::Failed(e) => e.to_string(),
        }
    }
}

/// Shared handle to the broker connection.
///
/// Cloning is cheap; all clones share the same connection and channel.
pub struct BrokerClient<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for BrokerClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> BrokerClient<C> {
    /// Creates a disconnected client. The first operation connects lazily.
    pub fn new(connector: C, config: BrokerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                slot: Mutex::new(Slot {
                    channel: None,
                    generation: 0,
                    declared: HashSet::new(),
                }),
                state,
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Connects eagerly, blocking until the broker is reachable or the
    /// attempt limit is reached.
    pub async fn connect(&self) -> Result<()> {
        self.channel().await.map(|_| ())
    }

    /// Connects on a background task and returns immediately.
    ///
    /// Operations issued before the connection is up wait on the same
    /// connect; a failure is logged and the next operation retries.
    pub fn connect_in_background(&self) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.connect().await {
                tracing::warn!(error = %e, "background broker connect failed");
            }
        })
    }

    /// Returns the live channel, connecting first if necessary.
    pub async fn channel(&self) -> Result<C::Channel> {
        let mut slot = self.inner.slot.lock().await;
        match slot.channel.clone() {
            Some(channel) => Ok(channel),
            None => self.connect_locked(&mut slot).await,
        }
    }

    /// Closes the current connection. A later operation reconnects.
    pub async fn close(&self) -> Result<()> {
        let channel = {
            let mut slot = self.inner.slot.lock().await;
            slot.declared.clear();
            self.inner.state.send_replace(ConnectionState::Disconnected);
            slot.channel.take()
        };
        match channel {
            Some(channel) => channel.close().await,
            None => Ok(()),
        }
    }

    async fn connect_locked(&self, slot: &mut Slot<C::Channel>) -> Result<C::Channel> {
        let config = &self.inner.config;
        self.inner.state.send_replace(ConnectionState::Connecting);
        let mut connecting = ConnectingGuard {
            state: &self.inner.state,
            armed: true,
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.open().await {
                Ok((channel, closed)) => {
                    slot.generation += 1;
                    slot.declared.clear();
                    slot.channel = Some(channel.clone());
                    connecting.armed = false;
                    self.inner.state.send_replace(ConnectionState::Connected);
                    if slot.generation > 1 {
                        metrics::counter!("broker_reconnects_total").increment(1);
                    }
                    tracing::info!(
                        generation = slot.generation,
                        attempts,
                        "broker connection established"
                    );
                    self.supervise(slot.generation, closed);
                    return Ok(channel);
                }
                Err(e) => {
                    if let Some(max) = config.max_connect_attempts {
                        if attempts >= max {
                            self.inner.state.send_replace(ConnectionState::Disconnected);
                            tracing::error!(attempts, error = %e, "giving up on broker connection");
                            return Err(BrokerError::ConnectAttemptsExhausted { attempts });
                        }
                    }
                    tracing::warn!(
                        attempt = attempts,
                        error = %e,
                        backoff_ms = config.reconnect_backoff.as_millis() as u64,
                        "broker connection failed, retrying"
                    );
                    tokio::time::sleep(config.reconnect_backoff).await;
                }
            }
        }
    }

    async fn open(&self) -> Result<(C::Channel, CloseSignal)> {
        let connection = self.inner.connector.connect().await?;
        if let Err(e) = connection.channel.enable_confirms().await {
            let _ = connection.channel.close().await;
            return Err(e);
        }
        Ok((connection.channel, connection.closed))
    }

    /// Watches the close signal of one connection generation and reconnects
    /// when it fires.
    fn supervise(&self, generation: u64, closed: CloseSignal) {
        let weak: Weak<Inner<C>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let reason = match closed.await {
                Ok(e) => e.to_string(),
                Err(_) => "connection dropped".to_string(),
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let client = BrokerClient { inner };
            if client.teardown(generation).await {
                tracing::warn!(generation, reason = %reason, "broker connection lost, reconnecting");
                if let Err(e) = client.channel().await {
                    tracing::error!(error = %e, "broker reconnect failed");
                }
            }
        });
    }

    /// Drops the channel of `generation` if it is still the current one.
    ///
    /// Returns `false` when a newer connection already replaced it.
    async fn teardown(&self, generation: u64) -> bool {
        let channel = {
            let mut slot = self.inner.slot.lock().await;
            if slot.generation != generation || slot.channel.is_none() {
                return false;
            }
            slot.declared.clear();
            self.inner.state.send_replace(ConnectionState::Disconnected);
            slot.channel.take()
        };
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                tracing::debug!(generation, error = %e, "closing stale channel failed");
            }
        }
        true
    }

    /// Returns a live channel on which `queue` has been declared, along with
    /// the connection generation it belongs to.
    async fn channel_for(&self, queue: &str) -> Result<(C::Channel, u64)> {
        let mut slot = self.inner.slot.lock().await;
        let channel = match slot.channel.clone() {
            Some(channel) => channel,
            None => self.connect_locked(&mut slot).await?,
        };
        if !slot.declared.contains(queue) {
            channel.declare_queue(queue).await?;
            slot.declared.insert(queue.to_string());
        }
        Ok((channel, slot.generation))
    }

    /// Declares `queue` on the current connection if not yet declared.
    pub async fn ensure_queue(&self, queue: &str) -> Result<()> {
        self.channel_for(queue).await.map(|_| ())
    }

    async fn attempt(&self, queue: &str, body: &[u8], headers: &MessageHeaders) -> (Option<u64>, Attempt) {
        let (channel, generation) = match self.channel_for(queue).await {
            Ok(found) => found,
            Err(e) => return (None, Attempt::Failed(e)),
        };
        let pending = match channel.publish(queue, body, headers).await {
            Ok(pending) => pending,
            Err(e) => return (Some(generation), Attempt::Failed(e)),
        };
        let outcome = match tokio::time::timeout(self.inner.config.confirm_timeout, pending).await {
            Ok(Ok(Confirmation::Ack | Confirmation::NotRequested)) => Attempt::Confirmed,
            Ok(Ok(Confirmation::Nack)) => Attempt::Nacked,
            Ok(Err(e)) => Attempt::Failed(e),
            Err(_) => Attempt::TimedOut,
        };
        (Some(generation), outcome)
    }

    /// Publishes a persistent message to `queue`.
    pub async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.publish_with_headers(queue, body, MessageHeaders::default())
            .await
    }

    /// Serializes `payload` as JSON and publishes it to `queue`.
    pub async fn publish_json<T: Serialize + ?Sized>(&self, queue: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.publish(queue, &body).await
    }

    /// Publishes with explicit headers.
    ///
    /// A failed attempt (send error, broker nack, or a confirmation timeout
    /// in strict mode) tears the connection down, reconnects and resends
    /// exactly once. Resending can duplicate a message that the broker did
    /// persist; consumers must tolerate that.
    #[tracing::instrument(skip(self, body, headers), fields(bytes = body.len()))]
    pub async fn publish_with_headers(
        &self,
        queue: &str,
        body: &[u8],
        headers: MessageHeaders,
    ) -> Result<()> {
        let started = Instant::now();
        let mode = self.inner.config.confirm_mode;
        let timeout = self.inner.config.confirm_timeout;

        let (generation, first) = self.attempt(queue, body, &headers).await;
        let result = match first {
            Attempt::Confirmed => Ok(()),
            Attempt::TimedOut if mode == ConfirmMode::Relaxed => {
                tracing::warn!(queue, "no delivery confirmation, treating publish as sent");
                Ok(())
            }
            Attempt::Failed(e @ BrokerError::ConnectAttemptsExhausted { .. }) => Err(e),
            failed => {
                tracing::warn!(
                    queue,
                    reason = %failed.describe(),
                    "publish failed, reconnecting and resending once"
                );
                if let Some(generation) = generation {
                    self.teardown(generation).await;
                }

                match self.attempt(queue, body, &headers).await.1 {
                    Attempt::Confirmed => Ok(()),
                    Attempt::TimedOut => match mode {
                        ConfirmMode::Relaxed => {
                            tracing::warn!(queue, "no delivery confirmation after resend, treating publish as sent");
                            Ok(())
                        }
                        ConfirmMode::Strict => Err(BrokerError::ConfirmTimeout {
                            queue: queue.to_string(),
                            timeout,
                        }),
                    },
                    Attempt::Nacked => Err(BrokerError::Nacked {
                        queue: queue.to_string(),
                    }),
                    Attempt::Failed(e) => Err(e),
                }
            }
        };

        metrics::histogram!("broker_publish_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(()) => metrics::counter!("broker_publish_total", "outcome" => "ok").increment(1),
            Err(e) => {
                metrics::counter!("broker_publish_total", "outcome" => "failed").increment(1);
                tracing::error!(queue, error = %e, "publish failed");
            }
        }
        result
    }

    /// Starts a manual-ack consumer on `queue`, declaring it first.
    pub async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let (channel, _) = self.channel_for(queue).await?;
        channel.consume(queue, self.inner.config.prefetch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use std::time::Duration;

    fn fast_config() -> BrokerConfig {
        BrokerConfig {
            reconnect_backoff: Duration::from_millis(10),
            confirm_timeout: Duration::from_millis(50),
            ..BrokerConfig::default()
        }
    }

    #[tokio::test]
    async fn connects_lazily_on_first_publish() {
        let broker = InMemoryBroker::new();
        let client = BrokerClient::new(broker.connector(), fast_config());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.publish("OrderCreated", b"{}").await.unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(broker.queue_depth("OrderCreated"), 1);
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn reuses_a_single_connection() {
        let broker = InMemoryBroker::new();
        let client = BrokerClient::new(broker.connector(), fast_config());

        for _ in 0..5 {
            client.publish("q", b"x").await.unwrap();
        }
        let clone = client.clone();
        clone.publish("q", b"y").await.unwrap();

        assert_eq!(broker.connection_count(), 1);
        assert_eq!(broker.queue_depth("q"), 6);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_connect() {
        let broker = InMemoryBroker::new();
        broker.refuse_connects(2);
        let client = BrokerClient::new(broker.connector(), fast_config());

        let mut handles = Vec::new();
        for i in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.publish("q", format!("{i}").as_bytes()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(broker.connection_count(), 1);
        assert_eq!(broker.queue_depth("q"), 8);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let broker = InMemoryBroker::new();
        broker.set_offline(true);
        let config = BrokerConfig {
            max_connect_attempts: Some(3),
            ..fast_config()
        };
        let client = BrokerClient::new(broker.connector(), config);

        let err = client.connect().await.unwrap_err();

        assert!(matches!(err, BrokerError::ConnectAttemptsExhausted { attempts: 3 }));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn cancelled_connect_does_not_stay_connecting() {
        let broker = InMemoryBroker::new();
        broker.set_offline(true);
        let client = BrokerClient::new(broker.connector(), fast_config());

        let publish = tokio::time::timeout(Duration::from_millis(50), client.publish("q", b"x")).await;
        assert!(publish.is_err());

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(broker.connect_attempts() >= 1);
    }

    #[tokio::test]
    async fn background_connect_returns_while_broker_is_down() {
        let broker = InMemoryBroker::new();
        broker.set_offline(true);
        let client = BrokerClient::new(broker.connector(), fast_config());

        let handle = client.connect_in_background();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        assert_eq!(client.state(), ConnectionState::Connecting);

        broker.set_offline(false);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn close_then_publish_reconnects() {
        let broker = InMemoryBroker::new();
        let client = BrokerClient::new(broker.connector(), fast_config());
        client.connect().await.unwrap();

        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.publish("q", b"x").await.unwrap();
        assert_eq!(broker.connection_count(), 2);
    }
}
