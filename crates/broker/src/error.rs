//! Broker error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the message broker.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The connection or channel could not be opened.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The connection was closed underneath an operation.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A channel-level operation (declare, qos, consume) failed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// The message could not be handed to the broker.
    #[error("Publish to '{queue}' failed: {reason}")]
    Publish { queue: String, reason: String },

    /// The broker explicitly refused the message.
    #[error("Broker rejected message for '{queue}'")]
    Nacked { queue: String },

    /// No delivery confirmation arrived in time (strict confirmation mode only).
    #[error("No delivery confirmation for '{queue}' within {timeout:?}")]
    ConfirmTimeout { queue: String, timeout: Duration },

    /// The configured connect attempt limit was reached.
    #[error("Gave up connecting to broker after {attempts} attempts")]
    ConnectAttemptsExhausted { attempts: u32 },

    /// Acknowledging or rejecting a delivery failed.
    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    /// A payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
