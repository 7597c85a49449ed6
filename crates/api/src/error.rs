//! API error types with HTTP response mapping.
//!
//! Every error body is `{"error": <text>, "kind": <stable kind>, ...}`. The
//! `kind` is the contract; the text is for humans.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderStatus;
use orchestrator::OrchestratorError;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Error from the order or payment orchestrators.
    Orchestrator(OrchestratorError),
    /// Missing, malformed or expired credentials.
    Unauthorized(String),
    /// Valid credentials without the required role.
    Forbidden(String),
    /// Malformed path parameter or body.
    BadRequest(String),
    /// A status value outside the order lifecycle.
    InvalidStatus(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Orchestrator(err) => err.kind(),
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) => "auth_error",
            ApiError::BadRequest(_) | ApiError::InvalidStatus(_) => "validation_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message, extra) = match self {
            ApiError::Orchestrator(err) => orchestrator_error_to_response(err),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, Value::Null),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, Value::Null),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, Value::Null),
            ApiError::InvalidStatus(msg) => {
                let valid: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.as_str()).collect();
                (StatusCode::BAD_REQUEST, msg, json!({ "validStatuses": valid }))
            }
        };

        let mut body = json!({ "error": message, "kind": kind });
        if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
            body.extend(extra);
        }
        (status, axum::Json(body)).into_response()
    }
}

fn orchestrator_error_to_response(err: OrchestratorError) -> (StatusCode, String, Value) {
    let message = err.to_string();
    match err {
        OrchestratorError::Validation(_)
        | OrchestratorError::EmptyCart
        | OrchestratorError::MissingAddress => (StatusCode::BAD_REQUEST, message, Value::Null),
        OrchestratorError::Auth(_) => (StatusCode::UNAUTHORIZED, message, Value::Null),
        OrchestratorError::NotFoundOrUnauthorized => (StatusCode::NOT_FOUND, message, Value::Null),
        OrchestratorError::UpstreamUnavailable { service, .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            message,
            json!({ "service": service }),
        ),
        OrchestratorError::UpstreamError { service, status } => (
            StatusCode::BAD_GATEWAY,
            message,
            json!({ "service": service, "upstreamStatus": status }),
        ),
        OrchestratorError::InvalidTransition { current, requested } => (
            StatusCode::BAD_REQUEST,
            message,
            json!({ "currentStatus": current, "requestedStatus": requested }),
        ),
        OrchestratorError::Conflict(_) => (StatusCode::CONFLICT, message, Value::Null),
        OrchestratorError::PaymentExists { payment_id } => (
            StatusCode::CONFLICT,
            message,
            json!({ "paymentID": payment_id }),
        ),
        OrchestratorError::Internal(detail) => {
            tracing::error!(error = %detail, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
                Value::Null,
            )
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PaymentId;

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_payment_exists_carries_id() {
        let payment_id = PaymentId::new();
        let (status, body) = render(OrchestratorError::PaymentExists { payment_id }.into()).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "payment_exists");
        assert_eq!(body["error"], "payment is already initiated");
        assert_eq!(body["paymentID"], payment_id.to_string());
    }

    #[tokio::test]
    async fn test_invalid_status_lists_valid_statuses() {
        let (status, body) = render(ApiError::InvalidStatus("Invalid order status".into())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");
        assert_eq!(body["validStatuses"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_exposed() {
        let (status, body) =
            render(OrchestratorError::Internal("connection pool timed out".into()).into()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "internal_error");
        assert_eq!(body["error"], "internal server error");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (OrchestratorError::EmptyCart, StatusCode::BAD_REQUEST),
            (OrchestratorError::MissingAddress, StatusCode::BAD_REQUEST),
            (OrchestratorError::NotFoundOrUnauthorized, StatusCode::NOT_FOUND),
            (
                OrchestratorError::UpstreamUnavailable {
                    service: "cart",
                    reason: "refused".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                OrchestratorError::UpstreamError {
                    service: "cart",
                    status: 500,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                OrchestratorError::InvalidTransition {
                    current: OrderStatus::Pending,
                    requested: OrderStatus::Shipped,
                },
                StatusCode::BAD_REQUEST,
            ),
            (OrchestratorError::Conflict("order is already cancelled".into()), StatusCode::CONFLICT),
        ];

        for (err, expected) in cases {
            let kind = err.kind();
            let (status, body) = render(err.into()).await;
            assert_eq!(status, expected, "{kind}");
            assert_eq!(body["kind"], kind);
        }
    }
}
