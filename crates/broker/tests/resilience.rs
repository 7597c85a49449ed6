//! Failure-injection tests for the broker client and consumer dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use broker::{
    AckMode, BrokerClient, BrokerConfig, BrokerError, ConfirmMode, ConnectionState, Dispatcher,
    HandlerError, InMemoryBroker, MessageHandler, RetryPolicy,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OrderCreated {
    order_id: String,
}

fn config(mode: ConfirmMode) -> BrokerConfig {
    BrokerConfig {
        reconnect_backoff: Duration::from_millis(10),
        confirm_timeout: Duration::from_millis(50),
        confirm_mode: mode,
        ..BrokerConfig::default()
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn publish_waits_out_refused_connects() {
    let broker = InMemoryBroker::new();
    broker.refuse_connects(3);
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));

    client
        .publish_json("OrderCreated", &OrderCreated { order_id: "o-1".into() })
        .await
        .unwrap();

    assert_eq!(broker.connect_attempts(), 4);
    assert_eq!(broker.queue_depth("OrderCreated"), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn supervisor_reconnects_after_broker_drops_connection() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));
    client.connect().await.unwrap();

    broker.refuse_connects(2);
    broker.sever_connections();

    let mut states = client.watch_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("reconnect in time")
    .unwrap();

    eventually(|| broker.connection_count() == 2).await;
    assert_eq!(broker.live_connections(), 1);

    client.publish("OrderCreated", b"{}").await.unwrap();
    assert_eq!(broker.queue_depth("OrderCreated"), 1);
}

#[tokio::test]
async fn failed_send_is_resent_once_on_a_new_connection() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));
    client.ensure_queue("OrderCreated").await.unwrap();

    broker.fail_next_publishes(1);
    client.publish("OrderCreated", b"{}").await.unwrap();

    assert_eq!(broker.connection_count(), 2);
    assert_eq!(broker.queue_depth("OrderCreated"), 1);
}

#[tokio::test]
async fn two_failed_sends_surface_the_error() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Relaxed));

    broker.fail_next_publishes(2);
    let err = client.publish("OrderCreated", b"{}").await.unwrap_err();

    assert!(matches!(err, BrokerError::Publish { .. }));
    assert_eq!(broker.queue_depth("OrderCreated"), 0);
}

#[tokio::test]
async fn nack_is_retried_once_then_reported() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Relaxed));

    broker.nack_next(1);
    client.publish("PaymentService", b"{}").await.unwrap();
    assert_eq!(broker.queue_depth("PaymentService"), 1);

    broker.nack_next(2);
    let err = client.publish("PaymentService", b"{}").await.unwrap_err();
    assert!(matches!(err, BrokerError::Nacked { ref queue } if queue == "PaymentService"));
    assert_eq!(broker.queue_depth("PaymentService"), 1);
}

#[tokio::test]
async fn relaxed_mode_treats_missing_confirm_as_sent() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Relaxed));

    broker.withhold_confirms_next(1);
    client.publish("OrderCreated", b"{}").await.unwrap();

    assert_eq!(broker.connection_count(), 1);
    assert_eq!(broker.queue_depth("OrderCreated"), 1);
}

#[tokio::test]
async fn strict_mode_resends_on_missing_confirm() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));

    broker.withhold_confirms_next(1);
    client.publish("OrderCreated", b"{}").await.unwrap();

    // The unconfirmed copy was stored too; consumers see a duplicate.
    assert_eq!(broker.connection_count(), 2);
    assert_eq!(broker.queue_depth("OrderCreated"), 2);
}

#[tokio::test]
async fn strict_mode_fails_after_second_missing_confirm() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));

    broker.withhold_confirms_next(2);
    let err = client.publish("OrderCreated", b"{}").await.unwrap_err();

    assert!(matches!(err, BrokerError::ConfirmTimeout { .. }));
}

#[derive(Clone, Default)]
struct Collect {
    seen: Arc<Mutex<Vec<OrderCreated>>>,
}

#[async_trait]
impl MessageHandler for Collect {
    type Message = OrderCreated;

    async fn handle(&self, message: OrderCreated) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(message);
        Ok(())
    }
}

#[tokio::test]
async fn consumer_resubscribes_and_sees_inflight_message_again() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));

    // Block the handler on the first delivery so it is unacked when the link drops.
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    struct Gated {
        gate: Arc<tokio::sync::Semaphore>,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<OrderCreated>>>,
    }

    #[async_trait]
    impl MessageHandler for Gated {
        type Message = OrderCreated;

        async fn handle(&self, message: OrderCreated) -> Result<(), HandlerError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let _permit = self.gate.acquire().await.map_err(|e| HandlerError::Failed(e.to_string()))?;
            }
            self.seen.lock().unwrap().push(message);
            Ok(())
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = Dispatcher::new(AckMode::default());
    dispatcher.register(
        "OrderCreated",
        Gated {
            gate: gate.clone(),
            calls: calls.clone(),
            seen: seen.clone(),
        },
    );
    let handle = dispatcher.spawn(client.clone());

    client
        .publish_json("OrderCreated", &OrderCreated { order_id: "o-1".into() })
        .await
        .unwrap();
    eventually(|| calls.load(Ordering::SeqCst) == 1).await;

    broker.sever_connections();
    gate.add_permits(1);

    let expected = OrderCreated { order_id: "o-1".into() };
    eventually(|| seen.lock().unwrap().len() >= 2).await;
    assert!(seen.lock().unwrap().iter().all(|m| *m == expected));
    eventually(|| broker.queue_depth("OrderCreated") == 0 && broker.unacked_count() == 0).await;
    handle.shutdown();
}

struct Flaky {
    failures_left: Arc<AtomicUsize>,
    inner: Collect,
}

#[async_trait]
impl MessageHandler for Flaky {
    type Message = OrderCreated;

    async fn handle(&self, message: OrderCreated) -> Result<(), HandlerError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(HandlerError::Failed("smtp timeout".into()));
        }
        self.inner.handle(message).await
    }
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));
    let collect = Collect::default();

    let mut dispatcher = Dispatcher::new(AckMode::default());
    dispatcher.register(
        "OrderCreated",
        Flaky {
            failures_left: Arc::new(AtomicUsize::new(2)),
            inner: collect.clone(),
        },
    );
    let handle = dispatcher.spawn(client.clone());

    client
        .publish_json("OrderCreated", &OrderCreated { order_id: "o-7".into() })
        .await
        .unwrap();

    let seen = collect.seen.clone();
    eventually(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(broker.queue_depth("OrderCreated.dead-letter"), 0);
    handle.shutdown();
}

#[tokio::test]
async fn exhausted_retries_land_in_dead_letter_queue() {
    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));

    let mut dispatcher = Dispatcher::new(AckMode::OnSuccess(RetryPolicy {
        max_retries: 2,
        ..RetryPolicy::default()
    }));
    dispatcher.register(
        "OrderCreated",
        Flaky {
            failures_left: Arc::new(AtomicUsize::new(usize::MAX)),
            inner: Collect::default(),
        },
    );
    let handle = dispatcher.spawn(client.clone());

    client
        .publish_json("OrderCreated", &OrderCreated { order_id: "o-9".into() })
        .await
        .unwrap();

    eventually(|| broker.queue_depth("OrderCreated.dead-letter") == 1).await;
    assert_eq!(broker.headers("OrderCreated.dead-letter")[0].retry_count, 2);
    assert_eq!(broker.queue_depth("OrderCreated"), 0);
    handle.shutdown();
}

#[tokio::test]
async fn rejected_messages_skip_retries() {
    struct Refuse;

    #[async_trait]
    impl MessageHandler for Refuse {
        type Message = OrderCreated;

        async fn handle(&self, _message: OrderCreated) -> Result<(), HandlerError> {
            Err(HandlerError::Rejected("unknown order".into()))
        }
    }

    let broker = InMemoryBroker::new();
    let client = BrokerClient::new(broker.connector(), config(ConfirmMode::Strict));
    let mut dispatcher = Dispatcher::new(AckMode::default());
    dispatcher.register("OrderCreated", Refuse);
    let handle = dispatcher.spawn(client.clone());

    client
        .publish_json("OrderCreated", &OrderCreated { order_id: "o-2".into() })
        .await
        .unwrap();

    eventually(|| broker.queue_depth("OrderCreated.dead-letter") == 1).await;
    assert_eq!(broker.headers("OrderCreated.dead-letter")[0].retry_count, 0);
    handle.shutdown();
}
