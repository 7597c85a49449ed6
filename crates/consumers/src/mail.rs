//! Outgoing mail.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{MailError, Result};

/// A plain-text mail ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends mail through some provider.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Writes mail to the log instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            body_len = message.body.len(),
            "mail sent"
        );
        Ok(())
    }
}

/// Keeps sent mail in memory, with fault injection.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    fail_next: Arc<AtomicU32>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` sends fail with a delivery error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, to: &str) -> Vec<MailMessage> {
        self.sent().into_iter().filter(|m| m.to == to).collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MailError::Delivery("simulated provider outage".into()));
        }
        self.sent
            .lock()
            .map_err(|_| MailError::Delivery("recorder poisoned".into()))?
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> MailMessage {
        MailMessage {
            to: "ada@example.com".into(),
            subject: "hi".into(),
            body: "hello".into(),
        }
    }

    #[tokio::test]
    async fn recording_mailer_fails_then_records() {
        let mailer = RecordingMailer::new();
        mailer.fail_next(1);

        assert!(matches!(
            mailer.send(&message()).await,
            Err(MailError::Delivery(_))
        ));
        mailer.send(&message()).await.unwrap();

        assert_eq!(mailer.sent(), vec![message()]);
        assert_eq!(mailer.sent_to("nobody@example.com").len(), 0);
    }

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        LogMailer.send(&message()).await.unwrap();
    }
}
