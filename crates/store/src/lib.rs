//! Persistence for orders, payments and the compensation log.
//!
//! Each concern has a port trait ([`OrderStore`], [`PaymentStore`],
//! [`CompensationLog`]) with an in-memory implementation for tests and local
//! runs, and [`PostgresStore`] implementing all three over JSONB documents.

pub mod compensation;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use compensation::{CompensationAction, CompensationId, CompensationLog, CompensationStatus, PendingCompensation};
pub use error::{Result, StoreError};
pub use memory::{InMemoryCompensationLog, InMemoryOrderStore, InMemoryPaymentStore};
pub use postgres::PostgresStore;
pub use store::{OrderStore, PaymentInsert, PaymentStore, Scope};
