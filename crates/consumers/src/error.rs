//! Consumer error types.

use broker::HandlerError;
use thiserror::Error;

/// Errors raised while sending mail.
#[derive(Debug, Clone, Error)]
pub enum MailError {
    /// The mail provider could not take the message. Worth retrying.
    #[error("mail delivery failed: {0}")]
    Delivery(String),

    /// The message can never be delivered as addressed.
    #[error("invalid recipient: {0:?}")]
    InvalidRecipient(String),
}

impl From<MailError> for HandlerError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Delivery(_) => HandlerError::Failed(err.to_string()),
            MailError::InvalidRecipient(_) => HandlerError::Rejected(err.to_string()),
        }
    }
}

/// Result type for mail operations.
pub type Result<T> = std::result::Result<T, MailError>;
