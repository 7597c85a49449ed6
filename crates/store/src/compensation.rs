//! Compensation log: follow-up actions that must eventually happen after a
//! committed write, retried until they succeed or are abandoned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

pub type CompensationId = Uuid;

/// What needs doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompensationAction {
    /// Empty the user's cart after their order was placed.
    ///
    /// Replays reuse the user's bearer token from the original request, so
    /// retries only succeed while that token is valid. Once it expires the
    /// cart service rejects the call and the entry runs out of attempts.
    ClearCart { user_id: UserId, token: String },
    /// Publish a message that could not be delivered at the time.
    Publish {
        queue: String,
        payload: serde_json::Value,
    },
}

impl CompensationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            CompensationAction::ClearCart { .. } => "clear_cart",
            CompensationAction::Publish { .. } => "publish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompensationStatus {
    Pending,
    Completed,
    Abandoned,
}

impl CompensationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationStatus::Pending => "pending",
            CompensationStatus::Completed => "completed",
            CompensationStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for CompensationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CompensationStatus::Pending),
            "completed" => Ok(CompensationStatus::Completed),
            "abandoned" => Ok(CompensationStatus::Abandoned),
            other => Err(format!("unknown compensation status '{other}'")),
        }
    }
}

/// One entry in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCompensation {
    pub id: CompensationId,
    pub action: CompensationAction,
    pub status: CompensationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingCompensation {
    /// A new entry whose first (inline) attempt already failed with `error`.
    pub fn after_failure(action: CompensationAction, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            status: CompensationStatus::Pending,
            attempts: 1,
            last_error: Some(error.into()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable queue of compensating actions.
#[async_trait]
pub trait CompensationLog: Send + Sync + 'static {
    async fn record(&self, entry: &PendingCompensation) -> Result<()>;

    /// Pending entries, oldest first.
    async fn pending(&self, limit: usize) -> Result<Vec<PendingCompensation>>;

    async fn mark_completed(&self, id: CompensationId, at: DateTime<Utc>) -> Result<()>;

    /// Counts a failed retry. With `abandon` the entry leaves the queue.
    async fn record_failure(
        &self,
        id: CompensationId,
        error: &str,
        abandon: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn pending_count(&self) -> Result<usize>;
}
