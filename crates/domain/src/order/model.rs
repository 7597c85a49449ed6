//! The order document.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Address, OrderError, OrderItem, OrderStatus};
use crate::money::Money;

/// A placed order.
///
/// The total is computed once, when the order is created, from the line
/// items as they were in the cart. It is never recomputed. The address is a
/// copy of the user's address at that time and only changes through
/// [`Order::update_address`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_price: Money,
    pub status: OrderStatus,
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a pending order with a fresh id.
    pub fn place(
        user_id: UserId,
        items: Vec<OrderItem>,
        address: Address,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let total_price = Self::total_of(&items)?;
        Ok(Self {
            order_id: OrderId::new(),
            user_id,
            items,
            total_price,
            status: OrderStatus::Pending,
            address,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sums `price × quantity` over `items` exactly.
    ///
    /// Fails on an empty list, an invalid item, mixed currencies, or a
    /// total too large to represent.
    pub fn total_of(items: &[OrderItem]) -> Result<Money, OrderError> {
        let first = items.first().ok_or(OrderError::NoItems)?;
        let currency = &first.price.currency;
        let mut total = Money::zero(currency.clone());
        for item in items {
            item.validate()?;
            if &item.price.currency != currency {
                return Err(OrderError::CurrencyMismatch {
                    expected: currency.to_string(),
                    found: item.price.currency.to_string(),
                });
            }
            let line = item.line_total().ok_or(OrderError::TotalOverflow)?;
            total = total.checked_add(&line).ok_or(OrderError::TotalOverflow)?;
        }
        Ok(total)
    }

    /// Returns true if `user` owns this order.
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.user_id == user
    }

    /// Moves the order to `next` if the transition table allows it.
    ///
    /// Returns the previous status.
    pub fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<OrderStatus, OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                requested: next,
            });
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        Ok(previous)
    }

    /// Cancels a pending order.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<OrderStatus, OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                requested: OrderStatus::Cancelled,
            });
        }
        self.transition_to(OrderStatus::Cancelled, now)
    }

    /// Replaces the address snapshot. Allowed in any status.
    pub fn update_address(&mut self, address: Address, now: DateTime<Utc>) -> Result<(), OrderError> {
        address.validate()?;
        self.address = address;
        self.updated_at = now;
        Ok(())
    }

    /// Total number of units across all items.
    pub fn unit_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn money(amount: &str, currency: &str) -> Money {
        Money::parse(amount, currency).unwrap()
    }

    fn address() -> Address {
        Address {
            street: "221B Baker St".into(),
            city: "London".into(),
            state: "LDN".into(),
            postal_code: "NW1".into(),
            country: "UK".into(),
        }
    }

    fn order() -> Order {
        Order::place(
            UserId::new("u-1"),
            vec![
                OrderItem::new("p-1", money("19.99", "USD"), 3),
                OrderItem::new("p-2", money("0.01", "USD"), 7),
            ],
            address(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_place_computes_exact_total() {
        let order = order();
        assert_eq!(order.total_price, money("60.04", "USD"));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.created_at, order.updated_at);
        assert_eq!(order.unit_count(), 10);
    }

    #[test]
    fn test_fractional_amounts_do_not_drift() {
        let items: Vec<OrderItem> = (0..10)
            .map(|i| OrderItem::new(format!("p-{i}"), money("0.1", "USD"), 1))
            .collect();
        let total = Order::total_of(&items).unwrap();
        assert_eq!(total.amount, Decimal::from_str("1.0").unwrap());
    }

    #[test]
    fn test_place_rejects_empty_items() {
        let result = Order::place(UserId::new("u-1"), vec![], address(), Utc::now());
        assert!(matches!(result, Err(OrderError::NoItems)));
    }

    #[test]
    fn test_place_rejects_mixed_currencies() {
        let items = vec![
            OrderItem::new("p-1", money("1", "USD"), 1),
            OrderItem::new("p-2", money("1", "INR"), 1),
        ];
        assert!(matches!(
            Order::total_of(&items),
            Err(OrderError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_transition_follows_table() {
        let mut order = order();
        let now = Utc::now();

        let err = order.transition_to(OrderStatus::Shipped, now).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                current: OrderStatus::Pending,
                requested: OrderStatus::Shipped
            }
        ));

        assert_eq!(order.transition_to(OrderStatus::Confirmed, now).unwrap(), OrderStatus::Pending);
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut order = order();
        let now = Utc::now();
        order.transition_to(OrderStatus::Confirmed, now).unwrap();
        order.transition_to(OrderStatus::Shipped, now).unwrap();

        assert!(order.cancel(now).is_err());
        assert_eq!(order.status, OrderStatus::Shipped);

        let mut fresh = self::order();
        fresh.cancel(now).unwrap();
        assert_eq!(fresh.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_update_address_ignores_status() {
        let mut order = order();
        let now = Utc::now();
        order.transition_to(OrderStatus::Confirmed, now).unwrap();

        let mut moved = address();
        moved.city = "Bath".into();
        order.update_address(moved.clone(), now).unwrap();

        assert_eq!(order.address, moved);
        assert_eq!(order.total_price, money("60.04", "USD"));
    }

    #[test]
    fn test_wire_format_field_names() {
        let json = serde_json::to_value(order()).unwrap();
        for field in ["orderId", "userId", "items", "totalPrice", "status", "address", "createdAt", "updatedAt"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["status"], "pending");
    }
}
