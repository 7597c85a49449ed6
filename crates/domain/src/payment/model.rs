use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

use super::PaymentError;
use crate::money::Money;

/// Payment status.
///
/// ```text
/// Pending ──┬──► Completed
///           └──► Failed
/// ```
///
/// Settles exactly once. A failed payment does not block a new attempt for
/// the same order; a pending or completed one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Returns true if this payment blocks another attempt for the same order.
    pub fn is_active(&self) -> bool {
        !matches!(self, PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result reported by the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    Failure,
}

impl VerificationOutcome {
    /// Gateways report `"success"`; anything else counts as a failure.
    pub fn from_gateway(status: &str) -> Self {
        if status.eq_ignore_ascii_case("success") {
            VerificationOutcome::Success
        } else {
            VerificationOutcome::Failure
        }
    }
}

/// A payment attempt for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "paymentID")]
    pub payment_id: PaymentId,
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub status: PaymentStatus,
    pub price: Money,
    #[serde(
        rename = "paymentGatewayTxnID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub gateway_txn_id: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Starts a pending payment for `order_id` with the order's total as price.
    pub fn initiate(
        order_id: OrderId,
        user_id: UserId,
        price: Money,
        now: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        if price.is_negative() || price.amount.is_zero() {
            return Err(PaymentError::InvalidAmount(price.to_string()));
        }
        Ok(Self {
            payment_id: PaymentId::new(),
            order_id,
            user_id,
            status: PaymentStatus::Pending,
            price,
            gateway_txn_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Settles a pending payment with the gateway's verdict.
    pub fn verify(
        &mut self,
        outcome: VerificationOutcome,
        gateway_txn_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<PaymentStatus, PaymentError> {
        if self.status != PaymentStatus::Pending {
            return Err(PaymentError::AlreadySettled {
                status: self.status,
            });
        }
        self.status = match outcome {
            VerificationOutcome::Success => PaymentStatus::Completed,
            VerificationOutcome::Failure => PaymentStatus::Failed,
        };
        self.gateway_txn_id = Some(gateway_txn_id.into());
        self.updated_at = now;
        Ok(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        Payment::initiate(
            OrderId::new(),
            UserId::new("u-1"),
            Money::parse("42.50", "INR").unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_initiate_is_pending() {
        let payment = payment();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.status.is_active());
        assert!(payment.gateway_txn_id.is_none());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let result = Payment::initiate(OrderId::new(), UserId::new("u"), Money::zero("USD"), Utc::now());
        assert!(matches!(result, Err(PaymentError::InvalidAmount(_))));
    }

    #[test]
    fn test_verify_success_completes() {
        let mut payment = payment();
        let status = payment
            .verify(VerificationOutcome::from_gateway("success"), "txn-1", Utc::now())
            .unwrap();
        assert_eq!(status, PaymentStatus::Completed);
        assert_eq!(payment.gateway_txn_id.as_deref(), Some("txn-1"));
    }

    #[test]
    fn test_verify_anything_else_fails() {
        let mut payment = payment();
        let status = payment
            .verify(VerificationOutcome::from_gateway("declined"), "txn-2", Utc::now())
            .unwrap();
        assert_eq!(status, PaymentStatus::Failed);
        assert!(!payment.status.is_active());
    }

    #[test]
    fn test_settles_only_once() {
        let mut payment = payment();
        payment
            .verify(VerificationOutcome::Success, "txn-1", Utc::now())
            .unwrap();

        let err = payment
            .verify(VerificationOutcome::Failure, "txn-2", Utc::now())
            .unwrap_err();

        assert_eq!(
            err,
            PaymentError::AlreadySettled {
                status: PaymentStatus::Completed
            }
        );
        assert_eq!(payment.gateway_txn_id.as_deref(), Some("txn-1"));
    }

    #[test]
    fn test_wire_format_field_names() {
        let json = serde_json::to_value(payment()).unwrap();
        for field in ["paymentID", "orderID", "userID", "status", "price", "createdAt", "updatedAt"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(json.get("paymentGatewayTxnID").is_none());
    }
}
