//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use super::OrderError;
use crate::money::Money;

/// Catalog product identifier, opaque to this service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A line item: a product, its unit price at the time of ordering, and a quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub price: Money,
    pub quantity: u32,
}

impl OrderItem {
    pub fn new(product_id: impl Into<ProductId>, price: Money, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            price,
            quantity,
        }
    }

    /// Returns `price × quantity`, or `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.price.times(self.quantity)
    }

    /// Checks quantity and price.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: self.product_id.to_string(),
                quantity: self.quantity,
            });
        }
        if self.price.is_negative() {
            return Err(OrderError::InvalidPrice {
                product_id: self.product_id.to_string(),
                price: self.price.to_string(),
            });
        }
        Ok(())
    }
}

/// A shipping address snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
}

impl Address {
    /// Checks that every field except the postal code is present.
    pub fn validate(&self) -> Result<(), OrderError> {
        let required = [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("country", &self.country),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::IncompleteAddress { field });
            }
        }
        Ok(())
    }
}
