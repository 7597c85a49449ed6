use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use domain::{Address, Order, OrderStatus, Payment, PaymentStatus};
use tokio::sync::RwLock;

use crate::compensation::{CompensationId, CompensationLog, CompensationStatus, PendingCompensation};
use crate::store::{OrderStore, PaymentInsert, PaymentStore, Scope};
use crate::{Result, StoreError};

/// In-memory order store for testing.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Returns an order regardless of owner.
    pub async fn get(&self, id: OrderId) -> Option<Order> {
        self.orders.read().await.get(&id).cloned()
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order store write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        self.check_write()?;
        self.orders.write().await.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn find_for_user(&self, user: &UserId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|order| order.is_owned_by(user))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn find(&self, id: OrderId, scope: &Scope) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .get(&id)
            .filter(|order| scope.permits(&order.user_id))
            .cloned())
    }

    async fn update_status(
        &self,
        id: OrderId,
        scope: &Scope,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.check_write()?;
        let mut orders = self.orders.write().await;
        let Some(order) = orders
            .get_mut(&id)
            .filter(|order| scope.permits(&order.user_id) && order.status == expected)
        else {
            return Ok(None);
        };
        order.status = next;
        order.updated_at = at;
        Ok(Some(order.clone()))
    }

    async fn update_address(
        &self,
        id: OrderId,
        scope: &Scope,
        address: &Address,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.check_write()?;
        let mut orders = self.orders.write().await;
        let Some(order) = orders
            .get_mut(&id)
            .filter(|order| scope.permits(&order.user_id))
        else {
            return Ok(None);
        };
        order.address = address.clone();
        order.updated_at = at;
        Ok(Some(order.clone()))
    }
}

/// In-memory payment store for testing.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_if_none_active(&self, payment: &Payment) -> Result<PaymentInsert> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("payment store write failure".into()));
        }
        // The write lock makes check-then-insert atomic.
        let mut payments = self.payments.write().await;
        let existing = payments.values().find(|p| {
            p.user_id == payment.user_id && p.order_id == payment.order_id && p.status.is_active()
        });
        if let Some(existing) = existing {
            return Ok(PaymentInsert::Existing(existing.payment_id));
        }
        payments.insert(payment.payment_id, payment.clone());
        Ok(PaymentInsert::Inserted)
    }

    async fn find(&self, id: PaymentId, scope: &Scope) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .get(&id)
            .filter(|payment| scope.permits(&payment.user_id))
            .cloned())
    }

    async fn settle(&self, payment: &Payment, scope: &Scope) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("payment store write failure".into()));
        }
        let mut payments = self.payments.write().await;
        match payments.get_mut(&payment.payment_id) {
            Some(stored) if scope.permits(&stored.user_id) && stored.status == PaymentStatus::Pending => {
                *stored = payment.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory compensation log for testing.
#[derive(Clone, Default)]
pub struct InMemoryCompensationLog {
    entries: Arc<RwLock<HashMap<CompensationId, PendingCompensation>>>,
}

impl InMemoryCompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every entry, whatever its status, oldest first.
    pub async fn entries(&self) -> Vec<PendingCompensation> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }
}

#[async_trait]
impl CompensationLog for InMemoryCompensationLog {
    async fn record(&self, entry: &PendingCompensation) -> Result<()> {
        self.entries.write().await.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<PendingCompensation>> {
        let mut pending: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.status == CompensationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_completed(&self, id: CompensationId, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.entries.write().await.get_mut(&id) {
            entry.status = CompensationStatus::Completed;
            entry.attempts += 1;
            entry.updated_at = at;
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: CompensationId,
        error: &str,
        abandon: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(entry) = self.entries.write().await.get_mut(&id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.updated_at = at;
            if abandon {
                entry.status = CompensationStatus::Abandoned;
            }
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.status == CompensationStatus::Pending)
            .count())
    }
}
