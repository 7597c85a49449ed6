//! Customer notification mail.
//!
//! One handler per notification queue. Each renders a plain-text mail and
//! hands it to a [`Mailer`]. Handlers remember what they have already sent,
//! keyed by the message's natural id, so a redelivered message does not send
//! a second mail.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use broker::{HandlerError, MessageHandler};
use domain::messages::{OrderPlaced, PaymentInitiated, UserRegistered};

use crate::error::MailError;
use crate::mail::{MailMessage, Mailer};

const BRAND: &str = "SUPERNOVA";

fn greeting_name(mail: &str) -> &str {
    mail.split('@').next().unwrap_or(mail)
}

pub fn welcome_mail(message: &UserRegistered) -> MailMessage {
    MailMessage {
        to: message.email.clone(),
        subject: format!("Welcome to {BRAND}, {}!", message.name),
        body: format!(
            "Hello {},\n\n\
             Welcome to {BRAND}! We're excited to have you on board.\n\
             You can now explore our platform and enjoy our services.\n\n\
             Best regards,\nThe {BRAND} Team",
            message.name
        ),
    }
}

pub fn payment_initiated_mail(message: &PaymentInitiated) -> MailMessage {
    MailMessage {
        to: message.receiver_mail.clone(),
        subject: format!("Payment Initiated for Order #{}", message.order_id),
        body: format!(
            "Hello {},\n\n\
             Your payment process has been initiated.\n\n\
             Order ID: {}\nPayment ID: {}\nAmount: {:.2} {}\n\n\
             You will receive a confirmation once the payment is successfully processed.\n\n\
             Best regards,\n{BRAND} Payments Team",
            greeting_name(&message.receiver_mail),
            message.order_id,
            message.payment_id,
            message.amount,
            message.currency
        ),
    }
}

pub fn order_placed_mail(message: &OrderPlaced) -> MailMessage {
    MailMessage {
        to: message.receiver_mail.clone(),
        subject: format!("Order Placed Successfully: #{}", message.order_id),
        body: format!(
            "Hello {},\n\n\
             Your order has been successfully placed!\n\n\
             Order ID: {}\nTotal Amount: {:.2} {}\n\n\
             You will receive a confirmation once the order is processed.\n\n\
             Best regards,\n{BRAND} Marketplace Team",
            greeting_name(&message.receiver_mail),
            message.order_id,
            message.total_amount,
            message.currency
        ),
    }
}

/// How many sent-notification keys a [`Notifier`] remembers.
pub const SENT_KEY_CAPACITY: usize = 10_000;

/// Keys of sent notifications. The oldest key is forgotten first.
#[derive(Debug)]
struct SentKeys {
    keys: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SentKeys {
    fn new(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) {
        if !self.keys.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Sends each notification at most once.
///
/// Only the most recent keys are remembered, so a redelivery arriving after
/// [`SENT_KEY_CAPACITY`] newer notifications can send a second mail.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    sent: Arc<Mutex<SentKeys>>,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self::with_capacity(mailer, SENT_KEY_CAPACITY)
    }

    pub fn with_capacity(mailer: Arc<dyn Mailer>, capacity: usize) -> Self {
        Self {
            mailer,
            sent: Arc::new(Mutex::new(SentKeys::new(capacity))),
        }
    }

    fn already_sent(&self, key: &str) -> bool {
        self.sent.lock().map(|s| s.contains(key)).unwrap_or(false)
    }

    #[cfg(test)]
    fn remembered(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    #[tracing::instrument(skip(self, message), fields(to = %message.to))]
    async fn deliver(&self, key: String, message: MailMessage) -> Result<(), HandlerError> {
        if self.already_sent(&key) {
            tracing::debug!(%key, "notification already sent, skipping");
            return Ok(());
        }
        if !message.to.contains('@') {
            return Err(MailError::InvalidRecipient(message.to).into());
        }

        self.mailer.send(&message).await?;
        metrics::counter!("notifications_sent_total").increment(1);
        if let Ok(mut sent) = self.sent.lock() {
            sent.insert(key);
        }
        Ok(())
    }
}

/// Consumes `AuthService`: welcome mail for new accounts.
pub struct WelcomeMailHandler(pub Notifier);

#[async_trait]
impl MessageHandler for WelcomeMailHandler {
    type Message = UserRegistered;

    async fn handle(&self, message: UserRegistered) -> Result<(), HandlerError> {
        let key = format!("welcome:{}", message.email.to_ascii_lowercase());
        self.0.deliver(key, welcome_mail(&message)).await
    }
}

/// Consumes `PaymentService`: payment initiated mail.
pub struct PaymentMailHandler(pub Notifier);

#[async_trait]
impl MessageHandler for PaymentMailHandler {
    type Message = PaymentInitiated;

    async fn handle(&self, message: PaymentInitiated) -> Result<(), HandlerError> {
        let key = format!("payment:{}", message.payment_id);
        self.0.deliver(key, payment_initiated_mail(&message)).await
    }
}

/// Consumes `OrderCreated`: order placed mail.
pub struct OrderMailHandler(pub Notifier);

#[async_trait]
impl MessageHandler for OrderMailHandler {
    type Message = OrderPlaced;

    async fn handle(&self, message: OrderPlaced) -> Result<(), HandlerError> {
        let key = format!("order:{}", message.order_id);
        self.0.deliver(key, order_placed_mail(&message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::RecordingMailer;
    use common::{OrderId, PaymentId};
    use domain::Currency;
    use rust_decimal::Decimal;

    fn order_placed() -> OrderPlaced {
        OrderPlaced {
            receiver_mail: "ada@example.com".into(),
            order_id: OrderId::new(),
            total_amount: Decimal::new(5998, 2),
            currency: Currency::usd(),
        }
    }

    #[test]
    fn order_mail_mentions_total_and_id() {
        let message = order_placed();
        let mail = order_placed_mail(&message);

        assert_eq!(mail.to, "ada@example.com");
        assert!(mail.subject.contains(&message.order_id.to_string()));
        assert!(mail.body.starts_with("Hello ada,"));
        assert!(mail.body.contains("Total Amount: 59.98 USD"));
    }

    #[test]
    fn payment_mail_formats_two_decimals() {
        let message = PaymentInitiated {
            receiver_mail: "bo@example.com".into(),
            payment_id: PaymentId::new(),
            order_id: OrderId::new(),
            amount: Decimal::new(85, 0),
            currency: Currency::inr(),
        };
        let mail = payment_initiated_mail(&message);

        assert!(mail.body.contains("Amount: 85.00 INR"));
        assert!(mail.body.contains(&message.payment_id.to_string()));
    }

    #[tokio::test]
    async fn redelivered_message_sends_one_mail() {
        let mailer = RecordingMailer::new();
        let handler = OrderMailHandler(Notifier::new(Arc::new(mailer.clone())));
        let message = order_placed();

        handler.handle(message.clone()).await.unwrap();
        handler.handle(message).await.unwrap();

        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn sent_keys_are_capped_oldest_first() {
        let mailer = RecordingMailer::new();
        let notifier = Notifier::with_capacity(Arc::new(mailer.clone()), 2);
        let handler = OrderMailHandler(notifier.clone());
        let first = order_placed();

        handler.handle(first.clone()).await.unwrap();
        handler.handle(order_placed()).await.unwrap();
        handler.handle(order_placed()).await.unwrap();
        assert_eq!(notifier.remembered(), 2);

        handler.handle(first).await.unwrap();
        assert_eq!(mailer.sent().len(), 4);
        assert_eq!(notifier.remembered(), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_retryable_and_not_remembered() {
        let mailer = RecordingMailer::new();
        mailer.fail_next(1);
        let handler = WelcomeMailHandler(Notifier::new(Arc::new(mailer.clone())));
        let message = UserRegistered {
            name: "Ada".into(),
            email: "ada@example.com".into(),
        };

        let err = handler.handle(message.clone()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));

        handler.handle(message).await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Welcome to SUPERNOVA, Ada!");
    }

    #[tokio::test]
    async fn missing_recipient_is_rejected() {
        let mailer = RecordingMailer::new();
        let handler = WelcomeMailHandler(Notifier::new(Arc::new(mailer.clone())));

        let err = handler
            .handle(UserRegistered {
                name: "Nobody".into(),
                email: String::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Rejected(_)));
        assert!(mailer.sent().is_empty());
    }
}
