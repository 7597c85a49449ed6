//! Orchestrator error types.

use common::PaymentId;
use domain::{OrderError, OrderStatus, PaymentError};
use store::StoreError;
use thiserror::Error;

/// Failure talking to a collaborator service.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The request never produced a response (connect error, timeout).
    #[error("{service} service unreachable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    /// The service answered with a non-success status.
    #[error("{service} service responded with status {status}")]
    Status { service: &'static str, status: u16 },

    /// The response body did not have the expected shape.
    #[error("{service} service sent an unreadable response: {reason}")]
    Decode { service: &'static str, reason: String },
}

/// Errors returned by the order and payment orchestrators.
///
/// Every variant has a stable [`kind`](OrchestratorError::kind) that callers
/// can match on; the display text is for humans only.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Auth(String),

    /// The record does not exist or is not visible to the caller.
    #[error("not found or not owned by caller")]
    NotFoundOrUnauthorized,

    #[error("cart is empty, cannot create order")]
    EmptyCart,

    #[error("user must have a shipping address configured")]
    MissingAddress,

    #[error("{service} service unavailable: {reason}")]
    UpstreamUnavailable { service: &'static str, reason: String },

    #[error("{service} service failed with status {status}")]
    UpstreamError { service: &'static str, status: u16 },

    #[error("invalid status transition from {current} to {requested}")]
    InvalidTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment is already initiated")]
    PaymentExists { payment_id: PaymentId },

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Machine-checkable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::Auth(_) => "auth_error",
            OrchestratorError::NotFoundOrUnauthorized => "not_found_or_unauthorized",
            OrchestratorError::EmptyCart => "empty_cart",
            OrchestratorError::MissingAddress => "missing_address",
            OrchestratorError::UpstreamUnavailable { .. } => "upstream_unavailable",
            OrchestratorError::UpstreamError { .. } => "upstream_error",
            OrchestratorError::InvalidTransition { .. } => "invalid_transition",
            OrchestratorError::Conflict(_) => "conflict",
            OrchestratorError::PaymentExists { .. } => "payment_exists",
            OrchestratorError::Internal(_) => "internal_error",
        }
    }
}

impl From<CollaboratorError> for OrchestratorError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Unavailable { service, reason } => {
                OrchestratorError::UpstreamUnavailable { service, reason }
            }
            CollaboratorError::Status { service, status } => {
                OrchestratorError::UpstreamError { service, status }
            }
            CollaboratorError::Decode { .. } => OrchestratorError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "persistence failure");
        OrchestratorError::Internal(err.to_string())
    }
}

impl From<OrderError> for OrchestratorError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { current, requested } if current == requested => {
                OrchestratorError::Conflict(format!("order is already {current}"))
            }
            OrderError::InvalidTransition { current, requested } => {
                OrchestratorError::InvalidTransition { current, requested }
            }
            other => OrchestratorError::Validation(other.to_string()),
        }
    }
}

impl From<PaymentError> for OrchestratorError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::AlreadySettled { .. } => OrchestratorError::Conflict(err.to_string()),
            PaymentError::InvalidAmount(_) => OrchestratorError::Validation(err.to_string()),
        }
    }
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
