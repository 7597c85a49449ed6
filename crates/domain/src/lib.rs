//! Domain layer for the commerce order services.
//!
//! This crate provides:
//! - [`Order`] documents with the [`OrderStatus`] state machine
//! - [`Payment`] documents with [`PaymentStatus`]
//! - [`Money`] with exact decimal arithmetic
//! - Queue names and message payloads shared by producers and consumers

pub mod error;
pub mod messages;
pub mod money;
pub mod order;
pub mod payment;

pub use error::DomainError;
pub use money::{Currency, Money};
pub use order::{Address, Order, OrderError, OrderItem, OrderStatus, ProductId};
pub use payment::{Payment, PaymentError, PaymentStatus, VerificationOutcome};
