//! Ports to the services the orchestrators depend on, with HTTP and
//! in-memory implementations.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use common::OrderId;
use domain::{Address, Order, OrderItem};
use serde::Deserialize;

use crate::caller::Caller;
use crate::error::CollaboratorError;

pub use http::{HttpCartClient, HttpIdentityClient, HttpOrderClient};
pub use memory::{InMemoryCartService, InMemoryIdentityService, InMemoryOrderService, StoreOrderClient};

/// The caller's cart as reported by the cart service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

/// The parts of a user profile the order flow needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "Addresses")]
    pub addresses: Vec<Address>,
}

/// Cart service: `GET /api/cart/get`, `DELETE /api/cart/clear`.
#[async_trait]
pub trait CartClient: Send + Sync + 'static {
    async fn get_cart(&self, caller: &Caller) -> Result<Cart, CollaboratorError>;

    async fn clear_cart(&self, caller: &Caller) -> Result<(), CollaboratorError>;
}

/// Identity service: `GET /api/auth/user`.
#[async_trait]
pub trait IdentityClient: Send + Sync + 'static {
    async fn get_user(&self, caller: &Caller) -> Result<UserProfile, CollaboratorError>;
}

/// Order service as seen by the payment flow: `GET /api/order/get/{id}`.
#[async_trait]
pub trait OrderClient: Send + Sync + 'static {
    async fn get_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order, CollaboratorError>;
}
