//! Orders: the document, its line items, and the status state machine.

mod model;
mod state;
mod value_objects;

pub use model::Order;
pub use state::OrderStatus;
pub use value_objects::{Address, OrderItem, ProductId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be at least 1)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price}")]
    InvalidPrice { product_id: String, price: String },

    /// Items are priced in more than one currency.
    #[error("Mixed currencies: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// A line total or the order total does not fit in a decimal.
    #[error("Order total is too large")]
    TotalOverflow,

    /// A required address field is blank.
    #[error("Address field '{field}' is required")]
    IncompleteAddress { field: &'static str },

    /// The requested status change is not an edge of the transition table.
    #[error("Invalid status transition from {current} to {requested}")]
    InvalidTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    /// Not one of the known statuses.
    #[error("Unknown order status '{0}'")]
    UnknownStatus(String),
}
