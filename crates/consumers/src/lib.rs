//! Downstream consumers of the order and payment queues.
//!
//! This crate provides:
//! - Notification handlers rendering customer mail through a [`Mailer`]
//! - [`SellerDashboardView`], the seller reporting read model, and its handlers
//! - [`register`] wiring every handler onto a [`Dispatcher`]

pub mod dashboard;
pub mod error;
pub mod mail;
pub mod notifications;
pub mod read_model;

use std::sync::Arc;

use broker::Dispatcher;
use domain::messages::queues;

pub use dashboard::{
    DashboardMetrics, OrderDashboardHandler, OrderStatusDashboardHandler, PaymentDashboardHandler,
    SellerDashboardView, TopProduct,
};
pub use error::{MailError, Result};
pub use mail::{LogMailer, MailMessage, Mailer, RecordingMailer};
pub use notifications::{Notifier, OrderMailHandler, PaymentMailHandler, WelcomeMailHandler};
pub use read_model::ReadModel;

/// Registers the notification and dashboard handlers on their queues.
pub fn register(dispatcher: &mut Dispatcher, mailer: Arc<dyn Mailer>, dashboard: SellerDashboardView) {
    let notifier = Notifier::new(mailer);
    dispatcher
        .register(queues::AUTH_SERVICE, WelcomeMailHandler(notifier.clone()))
        .register(queues::PAYMENT_SERVICE, PaymentMailHandler(notifier.clone()))
        .register(queues::ORDER_CREATED, OrderMailHandler(notifier))
        .register(queues::ORDER_DASHBOARD, OrderDashboardHandler(dashboard.clone()))
        .register(
            queues::ORDER_STATUS_DASHBOARD,
            OrderStatusDashboardHandler(dashboard.clone()),
        )
        .register(queues::PAYMENT_DASHBOARD, PaymentDashboardHandler(dashboard));
}
