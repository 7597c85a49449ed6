//! In-memory collaborators for tests and single-process runs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{OrderId, UserId};
use domain::{Address, Order, OrderItem};
use store::{OrderStore, Scope};

use super::{Cart, CartClient, IdentityClient, OrderClient, UserProfile};
use crate::caller::Caller;
use crate::error::CollaboratorError;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct CartState {
    carts: HashMap<UserId, Vec<OrderItem>>,
    fail_on_get: Option<CollaboratorError>,
    clear_failures_left: u32,
    clear_calls: usize,
    last_clear_token: Option<String>,
}

/// In-memory cart service with fault injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartService {
    state: Arc<RwLock<CartState>>,
}

impl InMemoryCartService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the user's cart.
    pub fn set_cart(&self, user: impl Into<UserId>, items: Vec<OrderItem>) {
        write(&self.state).carts.insert(user.into(), items);
    }

    pub fn items(&self, user: &UserId) -> Vec<OrderItem> {
        read(&self.state).carts.get(user).cloned().unwrap_or_default()
    }

    /// Makes every `get_cart` fail with `error` until reset with `None`.
    pub fn set_fail_on_get(&self, error: Option<CollaboratorError>) {
        write(&self.state).fail_on_get = error;
    }

    /// Makes the next `n` `clear_cart` calls fail with status 503.
    pub fn fail_next_clears(&self, n: u32) {
        write(&self.state).clear_failures_left = n;
    }

    pub fn clear_calls(&self) -> usize {
        read(&self.state).clear_calls
    }

    /// Bearer token of the most recent `clear_cart` call.
    pub fn last_clear_token(&self) -> Option<String> {
        read(&self.state).last_clear_token.clone()
    }
}

#[async_trait]
impl CartClient for InMemoryCartService {
    async fn get_cart(&self, caller: &Caller) -> Result<Cart, CollaboratorError> {
        let state = read(&self.state);
        if let Some(error) = &state.fail_on_get {
            return Err(error.clone());
        }
        Ok(Cart {
            items: state.carts.get(&caller.user_id).cloned().unwrap_or_default(),
        })
    }

    async fn clear_cart(&self, caller: &Caller) -> Result<(), CollaboratorError> {
        let mut state = write(&self.state);
        state.clear_calls += 1;
        state.last_clear_token = Some(caller.token.clone());
        if state.clear_failures_left > 0 {
            state.clear_failures_left -= 1;
            return Err(CollaboratorError::Status {
                service: "cart",
                status: 503,
            });
        }
        state.carts.remove(&caller.user_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct IdentityState {
    users: HashMap<UserId, UserProfile>,
    fail_on_get: Option<CollaboratorError>,
}

/// In-memory identity service with fault injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityService {
    state: Arc<RwLock<IdentityState>>,
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user(&self, user: impl Into<UserId>, email: impl Into<String>, addresses: Vec<Address>) {
        write(&self.state).users.insert(
            user.into(),
            UserProfile {
                email: email.into(),
                addresses,
            },
        );
    }

    pub fn set_fail_on_get(&self, error: Option<CollaboratorError>) {
        write(&self.state).fail_on_get = error;
    }
}

#[async_trait]
impl IdentityClient for InMemoryIdentityService {
    async fn get_user(&self, caller: &Caller) -> Result<UserProfile, CollaboratorError> {
        let state = read(&self.state);
        if let Some(error) = &state.fail_on_get {
            return Err(error.clone());
        }
        state
            .users
            .get(&caller.user_id)
            .cloned()
            .ok_or(CollaboratorError::Status {
                service: "identity",
                status: 404,
            })
    }
}

#[derive(Debug, Default)]
struct OrderState {
    orders: HashMap<OrderId, Order>,
    fail_on_get: Option<CollaboratorError>,
}

/// In-memory order service with fault injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_order(&self, order: Order) {
        write(&self.state).orders.insert(order.order_id, order);
    }

    pub fn set_fail_on_get(&self, error: Option<CollaboratorError>) {
        write(&self.state).fail_on_get = error;
    }
}

#[async_trait]
impl OrderClient for InMemoryOrderService {
    async fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order, CollaboratorError> {
        let state = read(&self.state);
        if let Some(error) = &state.fail_on_get {
            return Err(error.clone());
        }
        state
            .orders
            .get(&order_id)
            .filter(|order| order.is_owned_by(&caller.user_id))
            .cloned()
            .ok_or(CollaboratorError::Status {
                service: "order",
                status: 404,
            })
    }
}

/// Answers order lookups from a local [`OrderStore`], for deployments where
/// orders and payments run in the same process.
#[derive(Clone)]
pub struct StoreOrderClient {
    orders: Arc<dyn OrderStore>,
}

impl StoreOrderClient {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl OrderClient for StoreOrderClient {
    async fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order, CollaboratorError> {
        self.orders
            .find(order_id, &Scope::owner(&caller.user_id))
            .await
            .map_err(|e| CollaboratorError::Unavailable {
                service: "order",
                reason: e.to_string(),
            })?
            .ok_or(CollaboratorError::Status {
                service: "order",
                status: 404,
            })
    }
}
