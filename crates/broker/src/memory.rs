//! In-memory broker for tests and local runs.
//!
//! Queues are durable for the lifetime of the [`InMemoryBroker`]; connections
//! are not. Severing connections behaves like a broker restart seen from the
//! client side: every live connection receives its close signal, and
//! deliveries that were handed out but not acknowledged go back to the front
//! of their queue flagged as redelivered.
//!
//! Fault injection helpers simulate the failures the client has to survive:
//! refused connects, failed sends, negative confirmations and confirmations
//! that never arrive.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};

use crate::error::{BrokerError, Result};
use crate::transport::{
    Acknowledger, Channel, Confirmation, Connection, Connector, Delivery, DeliveryStream,
    MessageHeaders, PendingConfirm,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    headers: MessageHeaders,
    redelivered: bool,
}

struct Unacked {
    queue: String,
    consumer: u64,
    message: StoredMessage,
}

struct LiveConnection {
    close_tx: Option<oneshot::Sender<BrokerError>>,
    confirms: bool,
    unacked: HashMap<u64, Unacked>,
    inflight: HashMap<u64, u16>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    connections: HashMap<u64, LiveConnection>,
    next_id: u64,
    connect_attempts: usize,
    connections_opened: usize,
    offline: bool,
    refuse_connects: u32,
    fail_publishes: u32,
    nack_next: u32,
    withhold_next: u32,
    unroutable: usize,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Removes a connection and returns its unacked deliveries to their queues.
    fn drop_connection(&mut self, id: u64) -> Option<LiveConnection> {
        let mut conn = self.connections.remove(&id)?;
        let mut unacked: Vec<(u64, Unacked)> = conn.unacked.drain().collect();
        unacked.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        for (_, entry) in unacked {
            let mut message = entry.message;
            message.redelivered = true;
            self.queues.entry(entry.queue).or_default().push_front(message);
        }
        Some(conn)
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the queues consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An in-process message broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a connector that opens connections to this broker.
    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse_connects(&self, n: u32) {
        self.shared.lock().refuse_connects = n;
    }

    /// While offline every connection attempt is refused.
    pub fn set_offline(&self, offline: bool) {
        self.shared.lock().offline = offline;
    }

    /// Closes every live connection from the broker side.
    pub fn sever_connections(&self) {
        {
            let mut state = self.shared.lock();
            let ids: Vec<u64> = state.connections.keys().copied().collect();
            for id in ids {
                if let Some(mut conn) = state.drop_connection(id) {
                    if let Some(tx) = conn.close_tx.take() {
                        let _ = tx.send(BrokerError::ConnectionClosed(
                            "connection reset by broker".to_string(),
                        ));
                    }
                }
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Fails the next `n` publishes before they reach a queue.
    pub fn fail_next_publishes(&self, n: u32) {
        self.shared.lock().fail_publishes = n;
    }

    /// Negatively confirms the next `n` publishes without storing them.
    pub fn nack_next(&self, n: u32) {
        self.shared.lock().nack_next = n;
    }

    /// Stores the next `n` publishes but never confirms them.
    pub fn withhold_confirms_next(&self, n: u32) {
        self.shared.lock().withhold_next = n;
    }

    /// Declares a queue ahead of any client.
    pub fn declare(&self, queue: &str) {
        self.shared.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Number of ready (not yet delivered) messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.shared.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Bodies of the ready messages in `queue`, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Headers of the ready messages in `queue`, oldest first.
    pub fn headers(&self, queue: &str) -> Vec<MessageHeaders> {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.headers).collect())
            .unwrap_or_default()
    }

    /// Deliveries handed out and not yet settled, across all connections.
    pub fn unacked_count(&self) -> usize {
        self.shared
            .lock()
            .connections
            .values()
            .map(|c| c.unacked.len())
            .sum()
    }

    /// Total connections ever opened.
    pub fn connection_count(&self) -> usize {
        self.shared.lock().connections_opened
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.shared.lock().connections.len()
    }

    /// Total connection attempts, refused ones included.
    pub fn connect_attempts(&self) -> usize {
        self.shared.lock().connect_attempts
    }

    /// Messages dropped because their queue was never declared.
    pub fn unroutable_count(&self) -> usize {
        self.shared.lock().unroutable
    }
}

/// Connector for an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Channel = InMemoryChannel;

    async fn connect(&self) -> Result<Connection<InMemoryChannel>> {
        let mut state = self.shared.lock();
        state.connect_attempts += 1;
        if state.offline {
            return Err(BrokerError::Connect("broker unreachable".to_string()));
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(BrokerError::Connect("connection refused".to_string()));
        }

        let id = state.next_id();
        let (tx, rx) = oneshot::channel();
        state.connections.insert(
            id,
            LiveConnection {
                close_tx: Some(tx),
                confirms: false,
                unacked: HashMap::new(),
                inflight: HashMap::new(),
            },
        );
        state.connections_opened += 1;

        Ok(Connection {
            channel: InMemoryChannel {
                shared: Arc::clone(&self.shared),
                connection: id,
            },
            closed: rx,
        })
    }
}

/// A channel on one in-memory connection.
#[derive(Clone)]
pub struct InMemoryChannel {
    shared: Arc<Shared>,
    connection: u64,
}

impl InMemoryChannel {
    fn closed(&self) -> BrokerError {
        BrokerError::ConnectionClosed(format!("connection {} is closed", self.connection))
    }

    /// Hands out the next ready message if the consumer has capacity.
    fn try_deliver(&self, queue: &str, consumer: u64, prefetch: u16) -> Option<Result<Delivery>> {
        let mut state = self.shared.lock();
        let tag = state.next_id();
        let State {
            queues,
            connections,
            ..
        } = &mut *state;

        let Some(conn) = connections.get_mut(&self.connection) else {
            return Some(Err(self.closed()));
        };
        let inflight = conn.inflight.entry(consumer).or_default();
        if prefetch > 0 && *inflight >= prefetch {
            return None;
        }
        let message = queues.get_mut(queue)?.pop_front()?;
        *inflight += 1;
        conn.unacked.insert(
            tag,
            Unacked {
                queue: queue.to_string(),
                consumer,
                message: message.clone(),
            },
        );

        Some(Ok(Delivery {
            queue: queue.to_string(),
            body: message.body,
            headers: message.headers,
            redelivered: message.redelivered,
            acker: Box::new(InMemoryAcker {
                shared: Arc::clone(&self.shared),
                connection: self.connection,
                tag,
            }),
        }))
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.shared.lock();
        if !state.connections.contains_key(&self.connection) {
            return Err(self.closed());
        }
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn enable_confirms(&self) -> Result<()> {
        let mut state = self.shared.lock();
        let conn = state
            .connections
            .get_mut(&self.connection)
            .ok_or_else(|| self.closed())?;
        conn.confirms = true;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        headers: &MessageHeaders,
    ) -> Result<PendingConfirm> {
        let confirmation = {
            let mut state = self.shared.lock();
            let confirms = match state.connections.get(&self.connection) {
                Some(conn) => conn.confirms,
                None => return Err(self.closed()),
            };
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                return Err(BrokerError::Publish {
                    queue: queue.to_string(),
                    reason: "channel write failed".to_string(),
                });
            }
            if state.nack_next > 0 {
                state.nack_next -= 1;
                Some(Confirmation::Nack)
            } else {
                let withheld = state.withhold_next > 0;
                if withheld {
                    state.withhold_next -= 1;
                }
                let message = StoredMessage {
                    body: body.to_vec(),
                    headers: *headers,
                    redelivered: false,
                };
                match state.queues.get_mut(queue) {
                    Some(q) => q.push_back(message),
                    None => state.unroutable += 1,
                }
                match (withheld, confirms) {
                    (true, _) => None,
                    (false, true) => Some(Confirmation::Ack),
                    (false, false) => Some(Confirmation::NotRequested),
                }
            }
        };
        self.shared.notify.notify_waiters();

        let pending: PendingConfirm = match confirmation {
            Some(confirmation) => Box::pin(async move { Ok::<_, BrokerError>(confirmation) }),
            None => Box::pin(futures_util::future::pending::<Result<Confirmation>>()),
        };
        Ok(pending)
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream> {
        let consumer = {
            let mut state = self.shared.lock();
            if !state.connections.contains_key(&self.connection) {
                return Err(self.closed());
            }
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::Channel(format!("no queue '{queue}'")));
            }
            state.next_id()
        };

        let channel = self.clone();
        let queue = queue.to_string();
        let stream = futures_util::stream::unfold(channel, move |channel| {
            let queue = queue.clone();
            async move {
                // The wakeup future must not borrow `channel`; it is moved out
                // with each delivery.
                let shared = Arc::clone(&channel.shared);
                loop {
                    let notified = shared.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    match channel.try_deliver(&queue, consumer, prefetch) {
                        Some(Ok(delivery)) => return Some((Ok(delivery), channel)),
                        // Consumer streams end with their connection.
                        Some(Err(_)) => return None,
                        None => notified.await,
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            state.drop_connection(self.connection);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
    connection: u64,
    tag: u64,
}

impl InMemoryAcker {
    fn settle(&self, requeue: bool) -> Result<()> {
        {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            let conn = state
                .connections
                .get_mut(&self.connection)
                .ok_or_else(|| BrokerError::Ack("channel closed before settle".to_string()))?;
            let entry = conn
                .unacked
                .remove(&self.tag)
                .ok_or_else(|| BrokerError::Ack(format!("unknown delivery tag {}", self.tag)))?;
            if let Some(inflight) = conn.inflight.get_mut(&entry.consumer) {
                *inflight = inflight.saturating_sub(1);
            }
            if requeue {
                let mut message = entry.message;
                message.redelivered = true;
                state.queues.entry(entry.queue).or_default().push_front(message);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle(false)
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.settle(requeue)
    }
}
