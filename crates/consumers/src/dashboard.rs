//! Seller dashboard read model.
//!
//! Fed by the `OrderDashboard`, `OrderStatusDashboard` and `PaymentDashboard`
//! queues. Documents are upserted by id and the newer `updatedAt` wins, so
//! duplicate and out-of-order deliveries converge on the same state. A status
//! change that arrives before its order document is held until the document
//! shows up.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use broker::{HandlerError, MessageHandler};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use common::{OrderId, PaymentId};
use domain::messages::OrderStatusChanged;
use domain::{Order, OrderStatus, Payment, ProductId};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::read_model::ReadModel;

/// Best-selling product of the reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub product_id: ProductId,
    pub sold_units: u64,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub revenue: Decimal,
}

/// Sales figures over delivered orders created in the current UTC month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub total_revenue: Decimal,
    pub total_sales_count: u64,
    pub orders_count: usize,
    pub top_product: Option<TopProduct>,
}

#[derive(Default)]
struct DashboardState {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
    early_status: HashMap<OrderId, OrderStatusChanged>,
}

impl DashboardState {
    fn apply_status(order: &mut Order, change: &OrderStatusChanged) -> bool {
        if change.updated_at < order.updated_at {
            return false;
        }
        order.status = change.new_status;
        order.updated_at = change.updated_at;
        true
    }
}

/// How many status changes are held for orders not yet seen.
pub const HELD_STATUS_CAPACITY: usize = 10_000;

/// Orders and payments as seen by the seller.
#[derive(Clone)]
pub struct SellerDashboardView {
    state: Arc<RwLock<DashboardState>>,
    held_capacity: usize,
}

impl Default for SellerDashboardView {
    fn default() -> Self {
        Self::new()
    }
}

impl SellerDashboardView {
    pub fn new() -> Self {
        Self::with_held_capacity(HELD_STATUS_CAPACITY)
    }

    /// A view holding at most `capacity` early status changes. When full,
    /// the change with the oldest `updatedAt` is dropped.
    pub fn with_held_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(DashboardState::default())),
            held_capacity: capacity,
        }
    }

    /// Inserts or replaces an order document.
    pub async fn upsert_order(&self, mut order: Order) {
        let mut state = self.state.write().await;
        if let Some(existing) = state.orders.get(&order.order_id)
            && existing.updated_at > order.updated_at
        {
            tracing::debug!(order_id = %order.order_id, "stale order document ignored");
            return;
        }
        if let Some(change) = state.early_status.remove(&order.order_id) {
            DashboardState::apply_status(&mut order, &change);
        }
        state.orders.insert(order.order_id, order);
        metrics::gauge!("dashboard_orders").set(state.orders.len() as f64);
    }

    /// Applies a status change to a known order, or holds it until the
    /// order document arrives.
    pub async fn apply_status_change(&self, change: OrderStatusChanged) {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&change.order_id) {
            Some(order) => {
                if !DashboardState::apply_status(order, &change) {
                    tracing::debug!(order_id = %change.order_id, "stale status change ignored");
                }
            }
            None => {
                let newer = state
                    .early_status
                    .get(&change.order_id)
                    .is_none_or(|held| held.updated_at <= change.updated_at);
                if !newer {
                    return;
                }
                if !state.early_status.contains_key(&change.order_id)
                    && state.early_status.len() >= self.held_capacity
                {
                    let oldest = state
                        .early_status
                        .values()
                        .min_by_key(|held| held.updated_at)
                        .map(|held| held.order_id);
                    if let Some(order_id) = oldest {
                        state.early_status.remove(&order_id);
                        tracing::warn!(%order_id, "held status change dropped, order never arrived");
                    }
                }
                state.early_status.insert(change.order_id, change);
            }
        }
    }

    /// Inserts or replaces a payment document.
    pub async fn upsert_payment(&self, payment: Payment) {
        let mut state = self.state.write().await;
        let stale = state
            .payments
            .get(&payment.payment_id)
            .is_some_and(|existing| existing.updated_at > payment.updated_at);
        if !stale {
            state.payments.insert(payment.payment_id, payment);
        }
    }

    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        self.state.read().await.orders.get(&order_id).cloned()
    }

    /// All known orders, newest first.
    pub async fn orders(&self) -> Vec<Order> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    pub async fn payments_for(&self, order_id: OrderId) -> Vec<Payment> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        payments
    }

    /// Revenue, units and the top product over delivered orders created in
    /// the UTC month containing `now`. Ties for top product go to the lowest
    /// product id.
    pub async fn metrics(&self, now: DateTime<Utc>) -> DashboardMetrics {
        let Some((start, end)) = month_bounds(now) else {
            return DashboardMetrics::default();
        };

        let state = self.state.read().await;
        let delivered = state.orders.values().filter(|order| {
            order.status == OrderStatus::Delivered
                && order.created_at >= start
                && order.created_at < end
        });

        let mut metrics = DashboardMetrics::default();
        let mut products: BTreeMap<&ProductId, (u64, Decimal)> = BTreeMap::new();
        for order in delivered {
            metrics.orders_count += 1;
            for item in &order.items {
                let revenue = item
                    .price
                    .amount
                    .saturating_mul(Decimal::from(item.quantity));
                let units = u64::from(item.quantity);
                metrics.total_revenue = metrics.total_revenue.saturating_add(revenue);
                metrics.total_sales_count = metrics.total_sales_count.saturating_add(units);

                let entry = products.entry(&item.product_id).or_default();
                entry.0 = entry.0.saturating_add(units);
                entry.1 = entry.1.saturating_add(revenue);
            }
        }

        metrics.top_product = products
            .into_iter()
            .fold(None::<TopProduct>, |best, (product_id, (sold_units, revenue))| match best {
                Some(best) if best.sold_units >= sold_units => Some(best),
                _ => Some(TopProduct {
                    product_id: product_id.clone(),
                    sold_units,
                    revenue,
                }),
            });
        metrics
    }
}

fn month_bounds(now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let start = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?.and_hms_opt(0, 0, 0)?;
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.and_hms_opt(0, 0, 0)?;
    Some((start.and_utc(), end.and_utc()))
}

impl ReadModel for SellerDashboardView {
    fn name(&self) -> &'static str {
        "SellerDashboardView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.orders.len()).unwrap_or(0)
    }
}

/// Consumes `OrderDashboard`.
pub struct OrderDashboardHandler(pub SellerDashboardView);

#[async_trait]
impl MessageHandler for OrderDashboardHandler {
    type Message = Order;

    async fn handle(&self, order: Order) -> Result<(), HandlerError> {
        self.0.upsert_order(order).await;
        Ok(())
    }
}

/// Consumes `OrderStatusDashboard`.
pub struct OrderStatusDashboardHandler(pub SellerDashboardView);

#[async_trait]
impl MessageHandler for OrderStatusDashboardHandler {
    type Message = OrderStatusChanged;

    async fn handle(&self, change: OrderStatusChanged) -> Result<(), HandlerError> {
        self.0.apply_status_change(change).await;
        Ok(())
    }
}

/// Consumes `PaymentDashboard`.
pub struct PaymentDashboardHandler(pub SellerDashboardView);

#[async_trait]
impl MessageHandler for PaymentDashboardHandler {
    type Message = Payment;

    async fn handle(&self, payment: Payment) -> Result<(), HandlerError> {
        self.0.upsert_payment(payment).await;
        Ok(())
    }
}
