use bookstore_shared::{DeadLetter, DeadLetterReason};
use bookstore_store::app_config::ConsumerConfig;
use bookstore_store::broker::{BrokerError, Subscription};
use bookstore_store::{
    declare_topology, AckMode, ConsumeError, Connection, Connector, Delivery, MessageHandler,
    Publisher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Deliveries of one message before a transient failure is dead-lettered.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Consecutive failed reconnects before the host gives up.
    pub max_reconnect_attempts: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from(&ConsumerConfig::default())
    }
}

impl From<&ConsumerConfig> for ConsumerSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            reconnect_initial: Duration::from_millis(config.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
            max_reconnect_attempts: config.max_reconnect_attempts.max(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("gave up on the broker after {attempts} failed reconnects: {last}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        last: BrokerError,
    },
}

enum SessionEnd {
    Cancelled,
    ConnectionLost(BrokerError),
}

/// Keeps one handler subscribed to its queue for the life of the process.
///
/// Deliveries are processed one at a time with manual acks: a message is
/// acked only after its handler succeeded or it was dead-lettered, so a
/// crash or lost connection leaves it on the broker for redelivery.
pub struct ConsumerHost {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn MessageHandler>,
    settings: ConsumerSettings,
}

impl ConsumerHost {
    pub fn new(
        connector: Arc<dyn Connector>,
        handler: Arc<dyn MessageHandler>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            connector,
            handler,
            settings,
        }
    }

    /// Runs until cancelled, or until the broker stays unreachable for
    /// `max_reconnect_attempts` consecutive tries.
    pub async fn run(&self, token: CancellationToken) -> Result<(), HostError> {
        let queue = self.handler.queue();
        let mut failures = 0u32;
        let mut backoff = self.settings.reconnect_initial;

        while !token.is_cancelled() {
            let (connection, subscription) = match self.open().await {
                Ok(opened) => opened,
                Err(e) => {
                    failures += 1;
                    if failures >= self.settings.max_reconnect_attempts {
                        error!(%queue, attempts = failures, error = %e, "Giving up on the broker");
                        return Err(HostError::ReconnectExhausted {
                            attempts: failures,
                            last: e,
                        });
                    }
                    warn!(%queue, attempt = failures, error = %e, retry_in = ?backoff, "Broker connection failed");
                    if !self.pause(backoff, &token).await {
                        break;
                    }
                    backoff = (backoff * 2).min(self.settings.reconnect_max);
                    continue;
                }
            };

            failures = 0;
            backoff = self.settings.reconnect_initial;
            info!(%queue, "Consumer subscribed");

            let end = self.consume(connection.clone(), subscription, &token).await;
            connection.close().await;

            match end {
                SessionEnd::Cancelled => break,
                SessionEnd::ConnectionLost(e) => {
                    warn!(%queue, error = %e, "Broker connection lost, reconnecting");
                    if !self.pause(backoff, &token).await {
                        break;
                    }
                }
            }
        }

        info!(%queue, "Consumer stopped");
        Ok(())
    }

    async fn open(&self) -> Result<(Arc<dyn Connection>, Box<dyn Subscription>), BrokerError> {
        let connection = self.connector.connect().await?;
        let subscribed: Result<Box<dyn Subscription>, BrokerError> = async {
            declare_topology(connection.as_ref()).await?;
            connection.subscribe(self.handler.queue().name(), AckMode::Manual).await
        }
        .await;

        match subscribed {
            Ok(subscription) => Ok((connection, subscription)),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    async fn consume(
        &self,
        connection: Arc<dyn Connection>,
        mut subscription: Box<dyn Subscription>,
        token: &CancellationToken,
    ) -> SessionEnd {
        let publisher = Publisher::new(connection);

        loop {
            // Cancellation is only observed between deliveries.
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return SessionEnd::Cancelled,
                next = subscription.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return SessionEnd::ConnectionLost(e),
                None => return SessionEnd::ConnectionLost(BrokerError::ConnectionClosed),
            };

            if let Err(e) = self.process(delivery, &publisher, token).await {
                return SessionEnd::ConnectionLost(e);
            }
        }
    }

    /// Settles one delivery: ack, requeue, or dead-letter then ack.
    async fn process(
        &self,
        delivery: Delivery,
        publisher: &Publisher,
        token: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let queue = self.handler.queue();
        let attempt = delivery.attempt;

        let err = match self.handle(&delivery, publisher).await {
            Ok(()) => {
                debug!(%queue, attempt, "Message processed");
                return delivery.ack().await;
            }
            Err(err) => err,
        };

        let reason = if err.is_poison() {
            error!(%queue, attempt, error = %err, "Poison message, dead-lettering");
            DeadLetterReason::Poison
        } else if attempt < self.settings.max_attempts {
            warn!(%queue, attempt, max_attempts = self.settings.max_attempts, error = %err, "Processing failed, requeueing");
            self.pause(self.settings.retry_delay, token).await;
            return delivery.nack(true).await;
        } else {
            error!(%queue, attempt, error = %err, "Retries exhausted, dead-lettering");
            DeadLetterReason::RetriesExhausted
        };

        let letter = DeadLetter::new(queue, reason, &err, attempt, &delivery.payload);
        publisher.dead_letter(queue, &letter).await?;
        delivery.ack().await
    }

    /// Runs the handler on its own task so a panic only fails this delivery.
    async fn handle(&self, delivery: &Delivery, publisher: &Publisher) -> Result<(), ConsumeError> {
        let handler = self.handler.clone();
        let payload = delivery.payload.clone();
        let publisher = publisher.clone();

        tokio::spawn(async move { handler.handle(&payload, &publisher).await })
            .await
            .unwrap_or_else(|e| Err(ConsumeError::Panicked(e.to_string())))
    }

    /// Sleeps unless cancelled first. Returns `false` when cancelled.
    async fn pause(&self, duration: Duration, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
