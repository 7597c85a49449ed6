//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::UserId;
use domain::{Address, Money, Order, OrderItem, OrderStatus, Payment, VerificationOutcome};
use sqlx::PgPool;
use store::{
    CompensationAction, CompensationLog, CompensationStatus, OrderStore, PaymentInsert,
    PaymentStore, PendingCompensation, PostgresStore, Scope,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_order_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, payments, compensations")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn address(city: &str) -> Address {
    Address {
        street: "12 MG Road".into(),
        city: city.into(),
        state: "KA".into(),
        postal_code: "560001".into(),
        country: "IN".into(),
    }
}

fn order_for(user: &str) -> Order {
    Order::place(
        UserId::new(user),
        vec![
            OrderItem::new("p-1", Money::parse("19.99", "INR").unwrap(), 3),
            OrderItem::new("p-2", Money::parse("0.01", "INR").unwrap(), 1),
        ],
        address("Bengaluru"),
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_order_document_round_trips() {
    let store = get_test_store().await;
    let order = order_for("alice");
    store.insert(&order).await.unwrap();

    let loaded = OrderStore::find(&store, order.order_id, &Scope::owner(&order.user_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.total_price, order.total_price);
    assert_eq!(loaded.items, order.items);
    assert_eq!(loaded.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_find_hides_other_users_orders() {
    let store = get_test_store().await;
    let order = order_for("alice");
    store.insert(&order).await.unwrap();

    let bob = Scope::owner(&UserId::new("bob"));
    assert!(OrderStore::find(&store, order.order_id, &bob).await.unwrap().is_none());
    assert!(
        OrderStore::find(&store, order.order_id, &Scope::Any)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_find_for_user_newest_first() {
    let store = get_test_store().await;
    let mut older = order_for("alice");
    older.created_at = Utc::now() - Duration::days(1);
    let newer = order_for("alice");
    store.insert(&older).await.unwrap();
    store.insert(&newer).await.unwrap();
    store.insert(&order_for("bob")).await.unwrap();

    let orders = store.find_for_user(&UserId::new("alice")).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].order_id, newer.order_id);
}

#[tokio::test]
async fn test_update_status_compare_and_set() {
    let store = get_test_store().await;
    let order = order_for("alice");
    store.insert(&order).await.unwrap();

    let confirmed = store
        .update_status(
            order.order_id,
            &Scope::Any,
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);

    let stale = store
        .update_status(
            order.order_id,
            &Scope::Any,
            OrderStatus::Pending,
            OrderStatus::Cancelled,
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(stale.is_none());

    let stored = OrderStore::find(&store, order.order_id, &Scope::Any)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn test_update_status_wrong_owner_matches_nothing() {
    let store = get_test_store().await;
    let order = order_for("alice");
    store.insert(&order).await.unwrap();

    let result = store
        .update_status(
            order.order_id,
            &Scope::owner(&UserId::new("mallory")),
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_update_address_replaces_snapshot() {
    let store = get_test_store().await;
    let order = order_for("alice");
    store.insert(&order).await.unwrap();

    let updated = store
        .update_address(
            order.order_id,
            &Scope::owner(&order.user_id),
            &address("Mysuru"),
            Utc::now(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.address.city, "Mysuru");
    assert_eq!(updated.total_price, order.total_price);
}

#[tokio::test]
async fn test_second_active_payment_is_refused() {
    let store = get_test_store().await;
    let order = order_for("alice");
    let first = Payment::initiate(
        order.order_id,
        order.user_id.clone(),
        order.total_price.clone(),
        Utc::now(),
    )
    .unwrap();
    let second = Payment::initiate(
        order.order_id,
        order.user_id.clone(),
        order.total_price.clone(),
        Utc::now(),
    )
    .unwrap();

    assert_eq!(
        store.insert_if_none_active(&first).await.unwrap(),
        PaymentInsert::Inserted
    );
    assert_eq!(
        store.insert_if_none_active(&second).await.unwrap(),
        PaymentInsert::Existing(first.payment_id)
    );
    assert!(
        PaymentStore::find(&store, second.payment_id, &Scope::Any)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_concurrent_payment_inserts_keep_one() {
    let store = get_test_store().await;
    let order = order_for("alice");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let payment = Payment::initiate(
            order.order_id,
            order.user_id.clone(),
            order.total_price.clone(),
            Utc::now(),
        )
        .unwrap();
        handles.push(tokio::spawn(async move {
            store.insert_if_none_active(&payment).await.unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() == PaymentInsert::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
}

#[tokio::test]
async fn test_settle_once_then_retry_after_failure() {
    let store = get_test_store().await;
    let order = order_for("alice");
    let mut payment = Payment::initiate(
        order.order_id,
        order.user_id.clone(),
        order.total_price.clone(),
        Utc::now(),
    )
    .unwrap();
    store.insert_if_none_active(&payment).await.unwrap();

    payment
        .verify(VerificationOutcome::Failure, "txn-1", Utc::now())
        .unwrap();
    let scope = Scope::owner(&order.user_id);
    assert!(store.settle(&payment, &scope).await.unwrap());
    assert!(!store.settle(&payment, &scope).await.unwrap());

    let stored = PaymentStore::find(&store, payment.payment_id, &scope)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.gateway_txn_id.as_deref(), Some("txn-1"));

    let retry = Payment::initiate(
        order.order_id,
        order.user_id.clone(),
        order.total_price.clone(),
        Utc::now(),
    )
    .unwrap();
    assert_eq!(
        store.insert_if_none_active(&retry).await.unwrap(),
        PaymentInsert::Inserted
    );
}

#[tokio::test]
async fn test_compensation_log_queue() {
    let store = get_test_store().await;
    let entry = PendingCompensation::after_failure(
        CompensationAction::ClearCart {
            user_id: UserId::new("alice"),
            token: "token".into(),
        },
        "cart service unavailable",
        Utc::now(),
    );
    store.record(&entry).await.unwrap();

    let pending = store.pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, entry.id);
    assert_eq!(pending[0].action, entry.action);

    store
        .record_failure(entry.id, "still unavailable", false, Utc::now())
        .await
        .unwrap();
    let pending = store.pending(10).await.unwrap();
    assert_eq!(pending[0].attempts, 2);

    store
        .record_failure(entry.id, "gave up", true, Utc::now())
        .await
        .unwrap();
    assert_eq!(store.pending_count().await.unwrap(), 0);

    let status: String = sqlx::query_scalar("SELECT status FROM compensations WHERE id = $1")
        .bind(entry.id)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(status, CompensationStatus::Abandoned.as_str());
}
