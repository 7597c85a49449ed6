//! Queue names and the payloads published on them.
//!
//! The queue name selects the payload shape; there is no version field, so a
//! field rename here is a breaking change for every consumer of that queue.
//! Field names follow what the existing services already put on the wire.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::Currency;
use crate::order::{Order, OrderStatus};
use crate::payment::Payment;

/// Durable queue names.
pub mod queues {
    /// New account registered; payload [`super::UserRegistered`].
    pub const AUTH_SERVICE: &str = "AuthService";
    /// Order placed, for the customer mail; payload [`super::OrderPlaced`].
    pub const ORDER_CREATED: &str = "OrderCreated";
    /// Full order document for seller reporting; payload [`crate::Order`].
    pub const ORDER_DASHBOARD: &str = "OrderDashboard";
    /// Order status change for seller reporting; payload [`super::OrderStatusChanged`].
    pub const ORDER_STATUS_DASHBOARD: &str = "OrderStatusDashboard";
    /// Payment started, for the customer mail; payload [`super::PaymentInitiated`].
    pub const PAYMENT_SERVICE: &str = "PaymentService";
    /// Full payment document for seller reporting; payload [`crate::Payment`].
    pub const PAYMENT_DASHBOARD: &str = "PaymentDashboard";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegistered {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderPlaced {
    pub receiver_mail: String,
    #[serde(rename = "OrderID")]
    pub order_id: OrderId,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub currency: Currency,
}

impl OrderPlaced {
    pub fn for_order(order: &Order, receiver_mail: impl Into<String>) -> Self {
        Self {
            receiver_mail: receiver_mail.into(),
            order_id: order.order_id,
            total_amount: order.total_price.amount,
            currency: order.total_price.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiated {
    #[serde(rename = "receiverMail")]
    pub receiver_mail: String,
    #[serde(rename = "paymentID")]
    pub payment_id: PaymentId,
    #[serde(rename = "orderID")]
    pub order_id: OrderId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: Currency,
}

impl PaymentInitiated {
    pub fn for_payment(payment: &Payment, receiver_mail: impl Into<String>) -> Self {
        Self {
            receiver_mail: receiver_mail.into(),
            payment_id: payment.payment_id,
            order_id: payment.order_id,
            amount: payment.price.amount,
            currency: payment.price.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

impl OrderStatusChanged {
    pub fn new(order: &Order, old_status: OrderStatus) -> Self {
        Self {
            order_id: order.order_id,
            old_status,
            new_status: order.status,
            updated_at: order.updated_at,
        }
    }
}
