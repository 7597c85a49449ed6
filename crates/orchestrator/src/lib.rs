//! Order and payment orchestration.
//!
//! [`OrderOrchestrator`] runs the create-order saga (cart fetch, profile
//! fetch, insert, cart clear, event publication) and the status lifecycle.
//! [`PaymentOrchestrator`] follows the same shape against the order
//! collaborator. Follow-up actions that fail after a committed write go to
//! the compensation log through the [`Outbox`] and are retried by the
//! [`CompensationWorker`].

pub mod caller;
pub mod collaborators;
pub mod compensation;
pub mod config;
pub mod error;
pub mod orders;
pub mod outbox;
pub mod payments;

pub use caller::Caller;
pub use collaborators::{
    Cart, CartClient, HttpCartClient, HttpIdentityClient, HttpOrderClient, IdentityClient,
    InMemoryCartService, InMemoryIdentityService, InMemoryOrderService, OrderClient,
    StoreOrderClient, UserProfile,
};
pub use compensation::{CompensationReport, CompensationWorker};
pub use config::{CompensationPolicy, OrchestratorConfig};
pub use error::{CollaboratorError, OrchestratorError, Result};
pub use orders::{OrderCreated, OrderOrchestrator, StatusChange};
pub use outbox::{EventPublisher, Outbox};
pub use payments::{PaymentOrchestrator, Verification};
