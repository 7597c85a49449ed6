//! Resilient event pipeline shared by every service.
//!
//! This crate provides:
//! - [`Connector`] / [`Channel`] transport traits so the broker can be swapped
//!   for an in-memory fake in tests
//! - [`BrokerClient`], an explicit client object owning the single connection
//!   and channel, with reconnect supervision and publisher confirms
//! - [`Dispatcher`], which routes messages from named queues to typed
//!   [`MessageHandler`]s with retry and dead-letter support
//! - [`InMemoryBroker`] and [`AmqpConnector`] transport implementations

pub mod amqp;
pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod transport;

pub use amqp::{AmqpChannel, AmqpConnector};
pub use client::{BrokerClient, ConnectionState};
pub use config::{AckMode, BrokerConfig, ConfirmMode, RetryPolicy};
pub use consumer::{Dispatcher, DispatcherHandle, HandlerError, MessageHandler};
pub use error::{BrokerError, Result};
pub use memory::{InMemoryBroker, InMemoryChannel, InMemoryConnector};
pub use transport::{
    Acknowledger, Channel, CloseSignal, Confirmation, Connection, Connector, Delivery,
    DeliveryStream, MessageHeaders, PendingConfirm, RETRY_COUNT_HEADER,
};
