use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use domain::{Address, Order, OrderStatus, Payment, PaymentStatus};
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::compensation::{CompensationId, CompensationLog, CompensationStatus, PendingCompensation};
use crate::store::{OrderStore, PaymentInsert, PaymentStore, Scope};
use crate::{Result, StoreError};

/// PostgreSQL-backed store keeping each record as a JSONB document.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn document<T: DeserializeOwned>(row: &PgRow) -> Result<T> {
        let document: serde_json::Value = row.try_get("document")?;
        Ok(serde_json::from_value(document)?)
    }

    fn row_to_compensation(row: PgRow) -> Result<PendingCompensation> {
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;
        Ok(PendingCompensation {
            id: row.try_get("id")?,
            action: serde_json::from_value(row.try_get("action")?)?,
            status: status.parse().map_err(StoreError::Unavailable)?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Locks the order row and applies `change` to its document.
    async fn modify_order(
        &self,
        id: OrderId,
        scope: &Scope,
        expected: Option<OrderStatus>,
        change: impl FnOnce(&mut Order),
    ) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT document FROM orders
            WHERE id = $1
              AND ($2::text IS NULL OR user_id = $2)
              AND ($3::text IS NULL OR status = $3)
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .bind(scope.owner_filter())
        .bind(expected.map(|s| s.as_str()))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order: Order = Self::document(&row)?;
        change(&mut order);

        sqlx::query("UPDATE orders SET status = $2, document = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(order.status.as_str())
            .bind(serde_json::to_value(&order)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(order))
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, created_at, document)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.order_id.as_uuid())
        .bind(order.user_id.as_str())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(serde_json::to_value(order)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_for_user(&self, user: &UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT document FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::document).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn find(&self, id: OrderId, scope: &Scope) -> Result<Option<Order>> {
        let row = sqlx::query(
            "SELECT document FROM orders WHERE id = $1 AND ($2::text IS NULL OR user_id = $2)",
        )
        .bind(id.as_uuid())
        .bind(scope.owner_filter())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::document).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        id: OrderId,
        scope: &Scope,
        expected: OrderStatus,
        next: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.modify_order(id, scope, Some(expected), |order| {
            order.status = next;
            order.updated_at = at;
        })
        .await
    }

    #[tracing::instrument(skip(self, address))]
    async fn update_address(
        &self,
        id: OrderId,
        scope: &Scope,
        address: &Address,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        self.modify_order(id, scope, None, |order| {
            order.address = address.clone();
            order.updated_at = at;
        })
        .await
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    #[tracing::instrument(skip(self, payment), fields(payment_id = %payment.payment_id, order_id = %payment.order_id))]
    async fn insert_if_none_active(&self, payment: &Payment) -> Result<PaymentInsert> {
        // The partial unique index arbitrates concurrent inserts. A conflicting
        // row may turn failed before it is read back, hence the second pass.
        for _ in 0..2 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO payments (id, order_id, user_id, status, created_at, document)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (user_id, order_id) WHERE status <> 'failed' DO NOTHING
                "#,
            )
            .bind(payment.payment_id.as_uuid())
            .bind(payment.order_id.as_uuid())
            .bind(payment.user_id.as_str())
            .bind(payment.status.as_str())
            .bind(payment.created_at)
            .bind(serde_json::to_value(payment)?)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if inserted == 1 {
                return Ok(PaymentInsert::Inserted);
            }

            let existing: Option<Uuid> = sqlx::query_scalar(
                r#"
                SELECT id FROM payments
                WHERE user_id = $1 AND order_id = $2 AND status <> 'failed'
                "#,
            )
            .bind(payment.user_id.as_str())
            .bind(payment.order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = existing {
                return Ok(PaymentInsert::Existing(PaymentId::from_uuid(id)));
            }
        }
        Err(StoreError::Unavailable(
            "payment insert kept conflicting with a settling payment".into(),
        ))
    }

    #[tracing::instrument(skip(self))]
    async fn find(&self, id: PaymentId, scope: &Scope) -> Result<Option<Payment>> {
        let row = sqlx::query(
            "SELECT document FROM payments WHERE id = $1 AND ($2::text IS NULL OR user_id = $2)",
        )
        .bind(id.as_uuid())
        .bind(scope.owner_filter())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::document).transpose()
    }

    #[tracing::instrument(skip(self, payment), fields(payment_id = %payment.payment_id, status = %payment.status))]
    async fn settle(&self, payment: &Payment, scope: &Scope) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE payments SET status = $2, document = $3
            WHERE id = $1
              AND status = $4
              AND ($5::text IS NULL OR user_id = $5)
            "#,
        )
        .bind(payment.payment_id.as_uuid())
        .bind(payment.status.as_str())
        .bind(serde_json::to_value(payment)?)
        .bind(PaymentStatus::Pending.as_str())
        .bind(scope.owner_filter())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }
}

#[async_trait]
impl CompensationLog for PostgresStore {
    #[tracing::instrument(skip(self, entry), fields(id = %entry.id, kind = entry.action.kind()))]
    async fn record(&self, entry: &PendingCompensation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO compensations (id, action, status, attempts, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(serde_json::to_value(&entry.action)?)
        .bind(entry.status.as_str())
        .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
        .bind(&entry.last_error)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<PendingCompensation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, status, attempts, last_error, created_at, updated_at
            FROM compensations
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(CompensationStatus::Pending.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_compensation).collect()
    }

    async fn mark_completed(&self, id: CompensationId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE compensations
            SET status = $2, attempts = attempts + 1, last_error = NULL, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(CompensationStatus::Completed.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: CompensationId,
        error: &str,
        abandon: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let status = if abandon {
            CompensationStatus::Abandoned
        } else {
            CompensationStatus::Pending
        };
        sqlx::query(
            r#"
            UPDATE compensations
            SET status = $2, attempts = attempts + 1, last_error = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM compensations WHERE status = $1")
            .bind(CompensationStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
