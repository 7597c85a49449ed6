//! Persistence ports for orders and payments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use domain::{Address, Order, OrderStatus, Payment};

use crate::Result;

/// Which records a write or read may touch.
///
/// Owner-scoped operations that match nothing report "not found" without
/// saying whether the record exists under another owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Any record (administrators).
    Any,
    /// Only records owned by this user.
    Owner(UserId),
}

impl Scope {
    pub fn owner(user: &UserId) -> Self {
        Scope::Owner(user.clone())
    }

    /// Returns true if a record owned by `owner` is visible in this scope.
    pub fn permits(&self, owner: &UserId) -> bool {
        match self {
            Scope::Any => true,
            Scope::Owner(user) => user == owner,
        }
    }

    pub(crate) fn owner_filter(&self) -> Option<&str> {
        match self {
            Scope::Any => None,
            Scope::Owner(user) => Some(user.as_str()),
        }
    }
}

/// Storage for order documents.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Inserts a new order. A single atomic write.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Returns the user's orders, newest first.
    async fn find_for_user(&self, user: &UserId) -> Result<Vec<Order>>;

    /// Returns the order if it exists within `scope`.
    async fn find(&self, id: OrderId, scope: &Scope) -> Result<Option<Order>>;

    /// Sets the status if the order is within `scope` and its status is still
    /// `expected`. Returns the updated order, or `None` if nothing matched.
    async fn update_status(
        &self,
        id: OrderId,
        scope: &Scope,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    /// Replaces the address snapshot of an order within `scope`, whatever its
    /// status. Returns the updated order, or `None` if nothing matched.
    async fn update_address(
        &self,
        id: OrderId,
        scope: &Scope,
        address: &Address,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;
}

/// Outcome of [`PaymentStore::insert_if_none_active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentInsert {
    Inserted,
    /// A pending or completed payment already exists for the same user and order.
    Existing(PaymentId),
}

/// Storage for payment documents.
#[async_trait]
pub trait PaymentStore: Send + Sync + 'static {
    /// Inserts `payment` unless the same user already has a non-failed
    /// payment for the same order. Check and insert are atomic.
    async fn insert_if_none_active(&self, payment: &Payment) -> Result<PaymentInsert>;

    async fn find(&self, id: PaymentId, scope: &Scope) -> Result<Option<Payment>>;

    /// Writes a settled payment if the stored one is still pending.
    /// Returns false if nothing matched.
    async fn settle(&self, payment: &Payment, scope: &Scope) -> Result<bool>;
}
