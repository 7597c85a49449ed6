//! Payment endpoints under `/api/payment`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::{OrderId, PaymentId};
use domain::PaymentStatus;
use orchestrator::Verification;
use serde::{Deserialize, Serialize};

use super::{body, parse_order_id, parse_payment_id};
use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(rename = "paymentGatewayTxnID")]
    pub gateway_txn_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct PaymentInitiatedResponse {
    pub message: &'static str,
    #[serde(rename = "paymentID")]
    pub payment_id: PaymentId,
}

#[derive(Serialize)]
pub struct PaymentVerifiedResponse {
    pub message: &'static str,
    pub status: PaymentStatus,
    #[serde(rename = "paymentID")]
    pub payment_id: PaymentId,
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
}

/// POST /api/payment/create/{orderID}
#[tracing::instrument(skip(state, caller), fields(user_id = %caller.0.user_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentInitiatedResponse>, ApiError> {
    let payment = state.payments.create(&caller.0, parse_order_id(&order_id)?).await?;
    Ok(Json(PaymentInitiatedResponse {
        message: "Payment initiated",
        payment_id: payment.payment_id,
    }))
}

/// POST /api/payment/verify/{paymentID}
#[tracing::instrument(skip(state, caller, payload), fields(user_id = %caller.0.user_id))]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(payment_id): Path<String>,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentVerifiedResponse>, ApiError> {
    let payment_id = parse_payment_id(&payment_id)?;
    let request = body(payload)?;
    if request.gateway_txn_id.trim().is_empty() {
        return Err(ApiError::BadRequest("paymentGatewayTxnID is required".into()));
    }

    let payment = state
        .payments
        .verify(
            &caller.0,
            payment_id,
            Verification {
                gateway_txn_id: request.gateway_txn_id,
                status: request.status,
            },
        )
        .await?;

    Ok(Json(PaymentVerifiedResponse {
        message: "Payment verification updated",
        status: payment.status,
        payment_id: payment.payment_id,
        order_id: payment.order_id,
    }))
}
