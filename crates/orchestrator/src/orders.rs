//! Order orchestration: the create-order saga and the status lifecycle.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::OrderId;
use domain::messages::{OrderPlaced, OrderStatusChanged, queues};
use domain::{Address, Order, OrderStatus};
use store::{CompensationAction, OrderStore, Scope};

use crate::caller::Caller;
use crate::collaborators::{CartClient, IdentityClient};
use crate::config::{CompensationPolicy, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::outbox::Outbox;

/// Result of a successful `create`.
#[derive(Debug, Clone)]
pub struct OrderCreated {
    pub order: Order,
    /// False if the cart clear failed and was queued for retry.
    pub cart_cleared: bool,
}

/// Result of a status change.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order: Order,
    pub previous: OrderStatus,
}

/// Creates orders from carts and moves them through their lifecycle.
#[derive(Clone)]
pub struct OrderOrchestrator {
    orders: Arc<dyn OrderStore>,
    cart: Arc<dyn CartClient>,
    identity: Arc<dyn IdentityClient>,
    outbox: Outbox,
    policy: CompensationPolicy,
}

impl OrderOrchestrator {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        cart: Arc<dyn CartClient>,
        identity: Arc<dyn IdentityClient>,
        outbox: Outbox,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            orders,
            cart,
            identity,
            outbox,
            policy: config.compensation_policy,
        }
    }

    /// Turns the caller's cart into a pending order.
    ///
    /// Steps: fetch cart, fetch profile, persist the order, clear the cart,
    /// publish `OrderCreated` and `OrderDashboard`. Nothing is written before
    /// both fetches succeed. A failed cart clear is queued in the compensation
    /// log; whether it fails the call depends on the [`CompensationPolicy`].
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn create(&self, caller: &Caller) -> Result<OrderCreated> {
        let started = Instant::now();

        let cart = self.cart.get_cart(caller).await?;
        if cart.items.is_empty() {
            return Err(OrchestratorError::EmptyCart);
        }

        let profile = self.identity.get_user(caller).await?;
        let address = profile
            .addresses
            .into_iter()
            .next()
            .ok_or(OrchestratorError::MissingAddress)?;

        let order = Order::place(caller.user_id.clone(), cart.items, address, Utc::now())?;
        self.orders.insert(&order).await?;
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.order_id, total = %order.total_price, "order created");

        let clear_error = match self.cart.clear_cart(caller).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, error = %e, "cart clear failed after order creation");
                self.outbox
                    .defer(
                        CompensationAction::ClearCart {
                            user_id: caller.user_id.clone(),
                            token: caller.token.clone(),
                        },
                        e.to_string(),
                    )
                    .await;
                Some(e)
            }
        };

        let receiver = if profile.email.is_empty() {
            caller.email.as_str()
        } else {
            profile.email.as_str()
        };
        self.outbox
            .publish(queues::ORDER_CREATED, &OrderPlaced::for_order(&order, receiver))
            .await;
        self.outbox.publish(queues::ORDER_DASHBOARD, &order).await;

        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());

        match clear_error {
            Some(e) if self.policy == CompensationPolicy::Fail => Err(e.into()),
            clear_error => Ok(OrderCreated {
                order,
                cart_cleared: clear_error.is_none(),
            }),
        }
    }

    /// The caller's orders, newest first.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn list(&self, caller: &Caller) -> Result<Vec<Order>> {
        Ok(self.orders.find_for_user(&caller.user_id).await?)
    }

    /// One of the caller's orders.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get(&self, caller: &Caller, order_id: OrderId) -> Result<Order> {
        self.orders
            .find(order_id, &Scope::owner(&caller.user_id))
            .await?
            .ok_or(OrchestratorError::NotFoundOrUnauthorized)
    }

    /// Cancels one of the caller's orders. Only pending orders can be cancelled.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn cancel(&self, caller: &Caller, order_id: OrderId) -> Result<StatusChange> {
        let scope = Scope::owner(&caller.user_id);
        let mut order = self.load(order_id, &scope).await?;
        order.cancel(Utc::now())?;
        self.commit_status(order_id, &scope, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
    }

    /// Replaces the address snapshot of one of the caller's orders, whatever
    /// its status.
    #[tracing::instrument(skip(self, caller, address), fields(user_id = %caller.user_id))]
    pub async fn update_address(&self, caller: &Caller, order_id: OrderId, address: Address) -> Result<Order> {
        address.validate()?;
        let order = self
            .orders
            .update_address(order_id, &Scope::owner(&caller.user_id), &address, Utc::now())
            .await?
            .ok_or(OrchestratorError::NotFoundOrUnauthorized)?;

        tracing::info!(%order_id, "order address updated");
        self.outbox.publish(queues::ORDER_DASHBOARD, &order).await;
        Ok(order)
    }

    /// Moves an order along the transition table. Administrators may update
    /// any order; everyone else only their own.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id, admin = caller.is_admin))]
    pub async fn update_status(&self, caller: &Caller, order_id: OrderId, next: OrderStatus) -> Result<StatusChange> {
        let scope = if caller.is_admin {
            Scope::Any
        } else {
            Scope::owner(&caller.user_id)
        };
        let mut order = self.load(order_id, &scope).await?;
        let current = order.status;
        order.transition_to(next, Utc::now())?;
        self.commit_status(order_id, &scope, current, next).await
    }

    async fn load(&self, order_id: OrderId, scope: &Scope) -> Result<Order> {
        self.orders
            .find(order_id, scope)
            .await?
            .ok_or(OrchestratorError::NotFoundOrUnauthorized)
    }

    /// Writes `expected -> next` if the stored status is still `expected`.
    async fn commit_status(
        &self,
        order_id: OrderId,
        scope: &Scope,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<StatusChange> {
        let updated = self
            .orders
            .update_status(order_id, scope, expected, next, Utc::now())
            .await?;

        let Some(order) = updated else {
            // Someone else changed the order between read and write.
            let current = self.load(order_id, scope).await?;
            let refused = domain::OrderError::InvalidTransition {
                current: current.status,
                requested: next,
            };
            return Err(refused.into());
        };

        metrics::counter!(
            "order_status_transitions_total",
            "from" => expected.as_str(),
            "to" => next.as_str()
        )
        .increment(1);
        tracing::info!(%order_id, from = %expected, to = %next, "order status changed");

        self.outbox
            .publish(queues::ORDER_STATUS_DASHBOARD, &OrderStatusChanged::new(&order, expected))
            .await;

        Ok(StatusChange {
            order,
            previous: expected,
        })
    }
}
