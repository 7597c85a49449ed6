//! Payment orchestration against the order collaborator.

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, PaymentId};
use domain::messages::{PaymentInitiated, queues};
use domain::{Payment, VerificationOutcome};
use store::{PaymentInsert, PaymentStore, Scope};

use crate::caller::Caller;
use crate::collaborators::OrderClient;
use crate::error::{CollaboratorError, OrchestratorError, Result};
use crate::outbox::Outbox;

/// Gateway verdict for a pending payment.
#[derive(Debug, Clone)]
pub struct Verification {
    pub gateway_txn_id: String,
    /// `"success"` completes the payment; anything else fails it.
    pub status: String,
}

/// Starts and settles payments.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    payments: Arc<dyn PaymentStore>,
    orders: Arc<dyn OrderClient>,
    outbox: Outbox,
}

impl PaymentOrchestrator {
    pub fn new(payments: Arc<dyn PaymentStore>, orders: Arc<dyn OrderClient>, outbox: Outbox) -> Self {
        Self {
            payments,
            orders,
            outbox,
        }
    }

    /// Starts a pending payment for one of the caller's orders, priced at the
    /// order total. Refused if the caller already has a pending or completed
    /// payment for the order.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn create(&self, caller: &Caller, order_id: OrderId) -> Result<Payment> {
        let order = match self.orders.get_order(caller, order_id).await {
            Ok(order) => order,
            Err(CollaboratorError::Status { status: 404, .. }) => {
                return Err(OrchestratorError::NotFoundOrUnauthorized);
            }
            Err(e) => return Err(e.into()),
        };
        if !order.is_owned_by(&caller.user_id) {
            return Err(OrchestratorError::NotFoundOrUnauthorized);
        }

        let payment = Payment::initiate(order.order_id, caller.user_id.clone(), order.total_price, Utc::now())?;
        if let PaymentInsert::Existing(payment_id) = self.payments.insert_if_none_active(&payment).await? {
            tracing::info!(%order_id, %payment_id, "payment already initiated");
            return Err(OrchestratorError::PaymentExists { payment_id });
        }
        tracing::info!(%order_id, payment_id = %payment.payment_id, "payment initiated");

        self.outbox
            .publish(queues::PAYMENT_SERVICE, &PaymentInitiated::for_payment(&payment, caller.email.as_str()))
            .await;
        self.outbox.publish(queues::PAYMENT_DASHBOARD, &payment).await;

        Ok(payment)
    }

    /// Settles one of the caller's pending payments. A payment is settled
    /// exactly once; later attempts are conflicts.
    #[tracing::instrument(skip(self, caller, verification), fields(user_id = %caller.user_id))]
    pub async fn verify(&self, caller: &Caller, payment_id: PaymentId, verification: Verification) -> Result<Payment> {
        let scope = Scope::owner(&caller.user_id);
        let mut payment = self
            .payments
            .find(payment_id, &scope)
            .await?
            .ok_or(OrchestratorError::NotFoundOrUnauthorized)?;

        let outcome = VerificationOutcome::from_gateway(&verification.status);
        payment.verify(outcome, verification.gateway_txn_id, Utc::now())?;

        if !self.payments.settle(&payment, &scope).await? {
            return Err(OrchestratorError::Conflict("payment was settled concurrently".into()));
        }
        tracing::info!(%payment_id, status = %payment.status, "payment settled");

        self.outbox.publish(queues::PAYMENT_DASHBOARD, &payment).await;
        Ok(payment)
    }
}
