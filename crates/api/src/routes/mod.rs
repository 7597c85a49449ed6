//! HTTP route handlers.

pub mod dashboard;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use common::{OrderId, PaymentId};

use crate::error::ApiError;

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|_| ApiError::BadRequest("Invalid order ID format".into()))
}

pub(crate) fn parse_payment_id(id: &str) -> Result<PaymentId, ApiError> {
    PaymentId::parse(id).map_err(|_| ApiError::BadRequest("Invalid payment ID".into()))
}

/// Unwraps a JSON body, turning axum's rejection into a validation error.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e.body_text())))
}
