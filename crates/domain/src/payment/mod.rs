//! Payments against orders.

mod model;

pub use model::{Payment, PaymentStatus, VerificationOutcome};

use thiserror::Error;

/// Errors that can occur during payment operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The payment already left the pending state.
    #[error("Payment already {status}")]
    AlreadySettled { status: PaymentStatus },

    /// The price snapshot is not a positive amount.
    #[error("Invalid payment amount: {0}")]
    InvalidAmount(String),
}
