use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use super::{
    AckMode, Acknowledger, BrokerError, BrokerResult, Connection, Connector, Delivery,
    Subscription,
};

struct Message {
    id: u64,
    payload: Vec<u8>,
    deliveries: u32,
}

struct Outstanding {
    message: Message,
    connection: u64,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Outstanding>,
}

struct State {
    reachable: bool,
    next_message: u64,
    next_tag: u64,
    next_connection: u64,
    queues: HashMap<String, QueueState>,
    connections: HashMap<u64, Arc<AtomicBool>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            reachable: true,
            next_message: 0,
            next_tag: 0,
            next_connection: 0,
            queues: HashMap::new(),
            connections: HashMap::new(),
        }
    }
}

impl State {
    /// Puts every message held by `connection` back at the head of its queue.
    fn requeue_outstanding(&mut self, connection: u64) {
        for queue in self.queues.values_mut() {
            let mut returned: Vec<Message> = Vec::new();
            queue.unacked.retain(|_, outstanding| {
                if outstanding.connection == connection {
                    returned.push(Message {
                        id: outstanding.message.id,
                        payload: std::mem::take(&mut outstanding.message.payload),
                        deliveries: outstanding.message.deliveries,
                    });
                    false
                } else {
                    true
                }
            });
            returned.sort_by_key(|message| std::cmp::Reverse(message.id));
            for message in returned {
                queue.ready.push_front(message);
            }
        }
    }

    fn drop_connection(&mut self, connection: u64) {
        if let Some(open) = self.connections.remove(&connection) {
            open.store(false, Ordering::SeqCst);
        }
        self.requeue_outstanding(connection);
    }
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

/// Process-local broker with queue semantics close to a classic AMQP broker.
///
/// Queues are non-durable. Unacked manual deliveries return to the head of
/// their queue when the connection that received them closes or is severed.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// While unreachable, `connect` fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state().reachable = reachable;
    }

    /// Simulates a broker restart from the clients' side: every open
    /// connection is closed and its unacked messages are requeued.
    pub fn sever_connections(&self) {
        {
            let mut state = self.shared.state();
            let ids: Vec<u64> = state.connections.keys().copied().collect();
            for id in ids {
                state.drop_connection(id);
            }
        }
        self.shared.wake_all();
    }

    /// Messages waiting for delivery.
    pub fn len(&self, queue: &str) -> usize {
        self.shared.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    pub fn unacked_len(&self, queue: &str) -> usize {
        self.shared.state().queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    /// Payloads waiting for delivery, head first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .state()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|message| message.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn open_connections(&self) -> usize {
        self.shared.state().connections.len()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self) -> BrokerResult<Arc<dyn Connection>> {
        let mut state = self.shared.state();
        if !state.reachable {
            return Err(BrokerError::Unreachable("in-memory broker is down".into()));
        }

        state.next_connection += 1;
        let id = state.next_connection;
        let open = Arc::new(AtomicBool::new(true));
        state.connections.insert(id, open.clone());
        debug!(connection = id, "Opened in-memory broker connection");

        Ok(Arc::new(MemoryConnection {
            shared: self.shared.clone(),
            id,
            open,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
    open: Arc<AtomicBool>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn declare_queue(&self, name: &str) -> BrokerResult<()> {
        self.ensure_open()?;
        self.shared.state().queues.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.shared.state();
            state.next_message += 1;
            let id = state.next_message;
            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
            target.ready.push_back(Message {
                id,
                payload: payload.to_vec(),
                deliveries: 0,
            });
        }
        self.shared.wake_all();
        Ok(())
    }

    async fn subscribe(&self, queue: &str, mode: AckMode) -> BrokerResult<Box<dyn Subscription>> {
        self.ensure_open()?;
        if !self.shared.state().queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }

        Ok(Box::new(MemorySubscription {
            shared: self.shared.clone(),
            connection: self.id,
            open: self.open.clone(),
            queue: queue.to_string(),
            mode,
        }))
    }

    async fn close(&self) {
        self.shared.state().drop_connection(self.id);
        self.shared.wake_all();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// A connection dropped without `close` still hands its deliveries back.
impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.state().drop_connection(self.id);
        self.shared.wake_all();
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    connection: u64,
    open: Arc<AtomicBool>,
    queue: String,
    mode: AckMode,
}

impl MemorySubscription {
    fn try_take(&self) -> Option<BrokerResult<Delivery>> {
        let mut state = self.shared.state();
        if !self.open.load(Ordering::SeqCst) {
            return Some(Err(BrokerError::ConnectionClosed));
        }

        let queue = match state.queues.get_mut(&self.queue) {
            Some(queue) => queue,
            None => return Some(Err(BrokerError::UnknownQueue(self.queue.clone()))),
        };
        let mut message = queue.ready.pop_front()?;
        message.deliveries += 1;
        let attempt = message.deliveries;
        let payload = message.payload.clone();

        match self.mode {
            AckMode::Auto => Some(Ok(Delivery::auto_acked(self.queue.clone(), payload, attempt))),
            AckMode::Manual => {
                state.next_tag += 1;
                let tag = state.next_tag;
                if let Some(queue) = state.queues.get_mut(&self.queue) {
                    queue.unacked.insert(
                        tag,
                        Outstanding {
                            message,
                            connection: self.connection,
                        },
                    );
                }
                let acker = MemoryAcker {
                    shared: self.shared.clone(),
                    queue: self.queue.clone(),
                    tag,
                };
                Some(Ok(Delivery::new(self.queue.clone(), payload, attempt, Box::new(acker))))
            }
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<BrokerResult<Delivery>> {
        loop {
            // Register for wakeups before looking, so a publish between the
            // look and the wait is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take() {
                Some(Err(BrokerError::ConnectionClosed)) => return None,
                Some(result) => return Some(result),
                None => notified.await,
            }
        }
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
}

impl MemoryAcker {
    fn take_outstanding(&self, state: &mut State) -> BrokerResult<Message> {
        state
            .queues
            .get_mut(&self.queue)
            .and_then(|queue| queue.unacked.remove(&self.tag))
            .map(|outstanding| outstanding.message)
            .ok_or(BrokerError::StaleDelivery)
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> BrokerResult<()> {
        let mut state = self.shared.state();
        self.take_outstanding(&mut state).map(|_| ())
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        {
            let mut state = self.shared.state();
            let message = self.take_outstanding(&mut state)?;
            if requeue {
                if let Some(queue) = state.queues.get_mut(&self.queue) {
                    queue.ready.push_front(message);
                }
            }
        }
        self.shared.wake_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn connected(broker: &InMemoryBroker) -> Arc<dyn Connection> {
        let connection = broker.connect().await.unwrap();
        connection.declare_queue("q").await.unwrap();
        connection
    }

    #[tokio::test]
    async fn test_manual_delivery_stays_until_acked() {
        let broker = InMemoryBroker::new();
        let connection = connected(&broker).await;
        connection.publish("q", b"one").await.unwrap();

        let mut subscription = connection.subscribe("q", AckMode::Manual).await.unwrap();
        let delivery = subscription.next().await.unwrap().unwrap();

        assert_eq!(delivery.payload, b"one");
        assert_eq!(delivery.attempt, 1);
        assert!(!delivery.redelivered);
        assert_eq!(broker.len("q"), 0);
        assert_eq!(broker.unacked_len("q"), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.unacked_len("q"), 0);
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers_first() {
        let broker = InMemoryBroker::new();
        let connection = connected(&broker).await;
        connection.publish("q", b"one").await.unwrap();
        connection.publish("q", b"two").await.unwrap();

        let mut subscription = connection.subscribe("q", AckMode::Manual).await.unwrap();
        subscription.next().await.unwrap().unwrap().nack(true).await.unwrap();

        let again = subscription.next().await.unwrap().unwrap();
        assert_eq!(again.payload, b"one");
        assert_eq!(again.attempt, 2);
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_discards() {
        let broker = InMemoryBroker::new();
        let connection = connected(&broker).await;
        connection.publish("q", b"one").await.unwrap();

        let mut subscription = connection.subscribe("q", AckMode::Manual).await.unwrap();
        subscription.next().await.unwrap().unwrap().nack(false).await.unwrap();

        assert_eq!(broker.len("q"), 0);
        assert_eq!(broker.unacked_len("q"), 0);
    }

    #[tokio::test]
    async fn test_unacked_messages_return_when_connection_is_severed() {
        let broker = InMemoryBroker::new();
        let connection = connected(&broker).await;
        connection.publish("q", b"one").await.unwrap();
        connection.publish("q", b"two").await.unwrap();

        let mut subscription = connection.subscribe("q", AckMode::Manual).await.unwrap();
        let first = subscription.next().await.unwrap().unwrap();
        broker.sever_connections();

        assert!(!connection.is_open());
        assert!(subscription.next().await.is_none());
        assert!(matches!(first.ack().await, Err(BrokerError::StaleDelivery)));
        assert_eq!(broker.messages("q"), vec![b"one".to_vec(), b"two".to_vec()]);

        let reconnected = broker.connect().await.unwrap();
        let mut subscription = reconnected.subscribe("q", AckMode::Manual).await.unwrap();
        let redelivered = subscription.next().await.unwrap().unwrap();
        assert_eq!(redelivered.payload, b"one");
        assert!(redelivered.redelivered);
    }

    #[tokio::test]
    async fn test_dropped_connection_requeues_its_deliveries() {
        let broker = InMemoryBroker::new();
        let connection = connected(&broker).await;
        connection.publish("q", b"one").await.unwrap();

        let mut subscription = connection.subscribe("q", AckMode::Manual).await.unwrap();
        let delivery = subscription.next().await.unwrap().unwrap();
        assert_eq!(broker.unacked_len("q"), 1);

        drop(connection);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.unacked_len("q"), 0);
        assert_eq!(broker.messages("q"), vec![b"one".to_vec()]);
        assert!(subscription.next().await.is_none());
        assert!(matches!(delivery.ack().await, Err(BrokerError::StaleDelivery)));
    }

    #[tokio::test]
    async fn test_auto_ack_removes_on_delivery() {
        let broker = InMemoryBroker::new();
        let connection = connected(&broker).await;
        connection.publish("q", b"one").await.unwrap();

        let mut subscription = connection.subscribe("q", AckMode::Auto).await.unwrap();
        subscription.next().await.unwrap().unwrap();
        connection.close().await;

        assert_eq!(broker.len("q"), 0);
        assert_eq!(broker.unacked_len("q"), 0);
    }

    #[tokio::test]
    async fn test_waiting_subscriber_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let connection = connected(&broker).await;
        let mut subscription = connection.subscribe("q", AckMode::Manual).await.unwrap();

        let publisher = connection.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("q", b"late").await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_unreachable_broker_refuses_connections() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        assert!(matches!(broker.connect().await, Err(BrokerError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_fails() {
        let broker = InMemoryBroker::new();
        let connection = broker.connect().await.unwrap();
        assert!(matches!(
            connection.publish("nowhere", b"x").await,
            Err(BrokerError::UnknownQueue(_))
        ));
    }
}
