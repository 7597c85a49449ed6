//! Consumers driven through the dispatcher and the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use broker::{AckMode, BrokerClient, BrokerConfig, Dispatcher, InMemoryBroker, RetryPolicy};
use chrono::Utc;
use common::UserId;
use consumers::{RecordingMailer, SellerDashboardView, register};
use domain::messages::{OrderPlaced, OrderStatusChanged, UserRegistered, queues};
use domain::{Address, Money, Order, OrderItem, OrderStatus};

fn fast_config() -> BrokerConfig {
    BrokerConfig {
        reconnect_backoff: Duration::from_millis(10),
        confirm_timeout: Duration::from_millis(50),
        ..BrokerConfig::default()
    }
}

async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn order() -> Order {
    Order::place(
        UserId::new("u-1"),
        vec![OrderItem::new("p-1", Money::parse("29.99", "USD").unwrap(), 2)],
        Address {
            street: "1 Road".into(),
            city: "Town".into(),
            state: "ST".into(),
            postal_code: String::new(),
            country: "US".into(),
        },
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
async fn order_events_reach_mail_and_dashboard() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), fast_config());
    let mailer = RecordingMailer::new();
    let dashboard = SellerDashboardView::new();

    let mut dispatcher = Dispatcher::new(AckMode::default());
    register(&mut dispatcher, Arc::new(mailer.clone()), dashboard.clone());
    assert_eq!(dispatcher.queues().count(), 6);
    let handle = dispatcher.spawn(client.clone());

    let mut order = order();
    client
        .publish_json(queues::ORDER_CREATED, &OrderPlaced::for_order(&order, "ada@example.com"))
        .await
        .unwrap();
    client.publish_json(queues::ORDER_DASHBOARD, &order).await.unwrap();
    let old = order.transition_to(OrderStatus::Confirmed, Utc::now()).unwrap();
    client
        .publish_json(queues::ORDER_STATUS_DASHBOARD, &OrderStatusChanged::new(&order, old))
        .await
        .unwrap();

    let id = order.order_id;
    eventually(async || mailer.sent_to("ada@example.com").len() == 1).await;
    eventually(async || {
        dashboard
            .order(id)
            .await
            .is_some_and(|o| o.status == OrderStatus::Confirmed)
    })
    .await;
    handle.shutdown();
}

#[tokio::test]
async fn mail_outage_is_retried_until_delivered() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), fast_config());
    let mailer = RecordingMailer::new();
    mailer.fail_next(2);

    let mut dispatcher = Dispatcher::new(AckMode::OnSuccess(RetryPolicy {
        max_retries: 3,
        ..RetryPolicy::default()
    }));
    register(&mut dispatcher, Arc::new(mailer.clone()), SellerDashboardView::new());
    let handle = dispatcher.spawn(client.clone());

    client
        .publish_json(
            queues::AUTH_SERVICE,
            &UserRegistered {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            },
        )
        .await
        .unwrap();

    eventually(async || mailer.sent().len() == 1).await;
    assert_eq!(broker.queue_depth("AuthService.dead-letter"), 0);
    handle.shutdown();
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered() {
    let broker = InMemoryBroker::new();
    broker.declare("PaymentService.dead-letter");
    let client = BrokerClient::new(broker.connector(), fast_config());
    let mailer = RecordingMailer::new();

    let mut dispatcher = Dispatcher::new(AckMode::default());
    register(&mut dispatcher, Arc::new(mailer.clone()), SellerDashboardView::new());
    let handle = dispatcher.spawn(client.clone());

    client
        .publish(queues::PAYMENT_SERVICE, br#"{"receiverMail": 7}"#)
        .await
        .unwrap();

    eventually(async || broker.queue_depth("PaymentService.dead-letter") == 1).await;
    assert!(mailer.sent().is_empty());
    handle.shutdown();
}
