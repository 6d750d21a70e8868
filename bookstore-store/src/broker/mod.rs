//! Message broker plumbing.
//!
//! Services talk to the broker through [`Connector`] and [`Connection`] so the
//! same consumers run against the in-process broker, used for tests and the
//! single-process deployment, and against Kafka.

pub mod handler;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use async_trait::async_trait;
use bookstore_shared::{DeadLetter, EventContract, Queue};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use handler::{ConsumeError, MessageHandler};
#[cfg(feature = "kafka")]
pub use kafka::KafkaConnector;
pub use memory::InMemoryBroker;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("queue {0} has not been declared")]
    UnknownQueue(String),
    #[error("delivery is no longer outstanding")]
    StaleDelivery,
    #[error("cannot encode {contract}: {source}")]
    Encode {
        contract: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("broker error: {0}")]
    Backend(String),
}

impl BrokerError {
    /// Whether the connection this error came from should be discarded.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, BrokerError::Unreachable(_) | BrokerError::ConnectionClosed)
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The broker keeps the message until it is explicitly acked.
    Manual,
    /// The broker forgets the message as soon as it is delivered.
    Auto,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> BrokerResult<Arc<dyn Connection>>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Idempotent.
    async fn declare_queue(&self, name: &str) -> BrokerResult<()>;

    /// Returns once the broker has accepted the message.
    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()>;

    async fn subscribe(&self, queue: &str, mode: AckMode) -> BrokerResult<Box<dyn Subscription>>;

    /// Unacked deliveries go back to their queue. Never acks.
    async fn close(&self);

    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait Subscription: Send {
    /// `None` once the underlying connection is gone.
    async fn next(&mut self) -> Option<BrokerResult<Delivery>>;
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> BrokerResult<()>;
    async fn nack(&self, requeue: bool) -> BrokerResult<()>;
}

struct AutoAcked;

#[async_trait]
impl Acknowledger for AutoAcked {
    async fn ack(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn nack(&self, _requeue: bool) -> BrokerResult<()> {
        Ok(())
    }
}

/// A message handed to a subscriber.
pub struct Delivery {
    pub queue: String,
    pub payload: Vec<u8>,
    /// 1-based count of how often this message has been delivered.
    pub attempt: u32,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        queue: impl Into<String>,
        payload: Vec<u8>,
        attempt: u32,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            queue: queue.into(),
            payload,
            attempt,
            redelivered: attempt > 1,
            acker,
        }
    }

    pub fn auto_acked(queue: impl Into<String>, payload: Vec<u8>, attempt: u32) -> Self {
        Self::new(queue, payload, attempt, Box::new(AutoAcked))
    }

    pub async fn ack(self) -> BrokerResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> BrokerResult<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("attempt", &self.attempt)
            .field("redelivered", &self.redelivered)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Declares every queue of the choreography along with its dead-letter queue.
pub async fn declare_topology(connection: &dyn Connection) -> BrokerResult<()> {
    for queue in Queue::ALL {
        connection.declare_queue(queue.name()).await?;
        connection.declare_queue(&queue.dead_letter_name()).await?;
    }
    Ok(())
}

/// Typed publishing on top of a connection.
#[derive(Clone)]
pub struct Publisher {
    connection: Arc<dyn Connection>,
}

impl Publisher {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    pub async fn publish_event<E: EventContract>(&self, event: &E) -> BrokerResult<()> {
        let payload = event.encode().map_err(|source| BrokerError::Encode {
            contract: E::NAME,
            source,
        })?;
        self.connection.publish(E::QUEUE.name(), payload.as_bytes()).await?;
        debug!(queue = E::QUEUE.name(), order_id = event.order_id(), "Published {}", E::NAME);
        Ok(())
    }

    /// Publishes an already encoded payload, as stored in the outbox.
    pub async fn publish_raw(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        self.connection.publish(queue, payload).await
    }

    pub async fn dead_letter(&self, queue: Queue, letter: &DeadLetter) -> BrokerResult<()> {
        let payload = serde_json::to_vec(letter).map_err(|source| BrokerError::Encode {
            contract: "DeadLetter",
            source,
        })?;
        self.connection.publish(&queue.dead_letter_name(), &payload).await
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}

/// A connection that is opened on first use and reopened after it is lost.
///
/// Every fresh connection gets the full topology declared before use.
pub struct ManagedConnection {
    connector: Arc<dyn Connector>,
    current: Mutex<Option<Arc<dyn Connection>>>,
}

impl ManagedConnection {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
        }
    }

    async fn connection(&self) -> BrokerResult<Arc<dyn Connection>> {
        let mut current = self.current.lock().await;
        if let Some(connection) = current.as_ref().filter(|c| c.is_open()) {
            return Ok(connection.clone());
        }

        let connection = self.connector.connect().await?;
        declare_topology(connection.as_ref()).await?;
        *current = Some(connection.clone());
        Ok(connection)
    }

    async fn forget_if_lost(&self, err: &BrokerError) {
        if err.is_connection_loss() {
            warn!(error = %err, "Dropping broker connection");
            if let Some(lost) = self.current.lock().await.take() {
                lost.close().await;
            }
        }
    }
}

#[async_trait]
impl Connection for ManagedConnection {
    async fn declare_queue(&self, name: &str) -> BrokerResult<()> {
        let result = self.connection().await?.declare_queue(name).await;
        if let Err(err) = &result {
            self.forget_if_lost(err).await;
        }
        result
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        let result = match self.connection().await {
            Ok(connection) => connection.publish(queue, payload).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            self.forget_if_lost(err).await;
        }
        result
    }

    async fn subscribe(&self, queue: &str, mode: AckMode) -> BrokerResult<Box<dyn Subscription>> {
        self.connection().await?.subscribe(queue, mode).await
    }

    async fn close(&self) {
        if let Some(connection) = self.current.lock().await.take() {
            connection.close().await;
        }
    }

    fn is_open(&self) -> bool {
        true
    }
}
