//! Transport abstraction between the broker client and a concrete broker.
//!
//! The client only needs a handful of operations from a broker: open a
//! connection with one channel, learn when that connection dies, declare
//! durable queues, publish with confirmation, and pull deliveries with
//! manual acknowledgement. Keeping these behind traits lets the resilience
//! logic in [`crate::BrokerClient`] run against [`crate::InMemoryBroker`] in
//! tests and against AMQP in production.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use tokio::sync::oneshot;

use crate::error::{BrokerError, Result};

/// Header carrying the number of times a message has been redelivered.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Resolves once with the reason the connection was lost.
pub type CloseSignal = oneshot::Receiver<BrokerError>;

/// Resolves with the broker's verdict on a published message.
pub type PendingConfirm = Pin<Box<dyn Future<Output = Result<Confirmation>> + Send>>;

/// Stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// The broker's answer to a confirmed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the message.
    Ack,
    /// The broker refused the message.
    Nack,
    /// Confirms are not enabled on this channel.
    NotRequested,
}

/// Message metadata that travels with the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub retry_count: u32,
}

/// A freshly opened connection with its single channel.
pub struct Connection<C> {
    pub channel: C,
    pub closed: CloseSignal,
}

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Channel: Channel;

    async fn connect(&self) -> Result<Connection<Self::Channel>>;
}

/// Operations on an open broker channel.
#[async_trait]
pub trait Channel: Clone + Send + Sync + 'static {
    /// Declares a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Switches the channel into publisher-confirm mode.
    async fn enable_confirms(&self) -> Result<()>;

    /// Sends a persistent message to `queue` via the default exchange.
    ///
    /// Returns once the message is handed to the broker; the returned future
    /// resolves with the confirmation.
    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        headers: &MessageHeaders,
    ) -> Result<PendingConfirm>;

    /// Starts a manual-ack consumer on `queue` with the given prefetch.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream>;

    /// Closes the channel and its connection.
    async fn close(&self) -> Result<()>;
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// A message received from a queue.
pub struct Delivery {
    pub queue: String,
    pub body: Vec<u8>,
    pub headers: MessageHeaders,
    /// True when the broker delivered this message before without an ack.
    pub redelivered: bool,
    pub acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("bytes", &self.body.len())
            .field("headers", &self.headers)
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
