use bookstore_core::repository::OutboxRepository;
use bookstore_core::{OutboxMessage, StoreError};
use bookstore_store::app_config::OutboxConfig;
use bookstore_store::broker::BrokerError;
use bookstore_store::Publisher;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub batch_size: i64,
    pub poll_interval: Duration,
    /// How long a claim stays exclusive before another relay may take over.
    pub lease: chrono::Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self::from(&OutboxConfig::default())
    }
}

impl From<&OutboxConfig> for OutboxSettings {
    fn from(config: &OutboxConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            lease: chrono::Duration::seconds(config.lease_seconds),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub published: usize,
    pub released: usize,
}

/// Moves committed outbox rows onto the broker.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxRepository>,
    publisher: Publisher,
    settings: OutboxSettings,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<dyn OutboxRepository>, publisher: Publisher, settings: OutboxSettings) -> Self {
        Self {
            outbox,
            publisher,
            settings,
        }
    }

    /// Publishes one message right away. Returns `false` when someone else
    /// holds the claim or it was already published.
    pub async fn publish_claimed(&self, id: i64) -> Result<bool, RelayError> {
        let Some(message) = self.outbox.claim(id, self.settings.lease).await? else {
            return Ok(false);
        };
        self.deliver(&message).await?;
        Ok(true)
    }

    /// Publishes one batch of pending or abandoned messages, oldest first.
    ///
    /// Stops at the first broker failure and hands the rest of the batch
    /// back, so messages are never published out of order within a drain.
    pub async fn drain(&self) -> Result<DrainReport, RelayError> {
        let batch = self
            .outbox
            .claim_batch(self.settings.batch_size, self.settings.lease)
            .await?;
        let mut report = DrainReport {
            claimed: batch.len(),
            ..DrainReport::default()
        };

        let mut remaining = batch.iter();
        for message in remaining.by_ref() {
            match self.deliver(message).await {
                Ok(()) => report.published += 1,
                Err(RelayError::Broker(e)) => {
                    report.released += 1;
                    warn!(outbox_id = message.id, error = %e, "Outbox publish failed, deferring the rest of the batch");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        for message in remaining {
            self.outbox.release(message.id, "deferred after earlier failure").await?;
            report.released += 1;
        }

        if report.claimed > 0 {
            debug!(?report, "Outbox drained");
        }
        Ok(report)
    }

    /// Polls the outbox until cancelled.
    pub async fn run(&self, token: CancellationToken) {
        info!(interval = ?self.settings.poll_interval, "Outbox relay started");
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.drain().await {
                        error!(error = %e, "Outbox drain failed");
                    }
                }
            }
        }
        info!("Outbox relay stopped");
    }

    async fn deliver(&self, message: &OutboxMessage) -> Result<(), RelayError> {
        if let Err(e) = self
            .publisher
            .publish_raw(&message.queue, message.payload.as_bytes())
            .await
        {
            self.outbox.release(message.id, &e.to_string()).await?;
            return Err(e.into());
        }
        self.outbox.mark_published(message.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookstore_core::repository::OrderRepository;
    use bookstore_core::{NewOrder, OutboxStatus};
    use bookstore_store::broker::Connector;
    use bookstore_store::{declare_topology, InMemoryBroker, ManagedConnection, MemoryOrderStore};
    use rust_decimal::Decimal;

    async fn setup() -> (Arc<MemoryOrderStore>, InMemoryBroker, OutboxRelay) {
        let store = Arc::new(MemoryOrderStore::new());
        let broker = InMemoryBroker::new();
        declare_topology(broker.connect().await.unwrap().as_ref()).await.unwrap();
        let publisher = Publisher::new(Arc::new(ManagedConnection::new(Arc::new(broker.clone()))));
        let relay = OutboxRelay::new(store.clone(), publisher, OutboxSettings::default());
        (store, broker, relay)
    }

    async fn place(store: &MemoryOrderStore, customer_id: i64) -> i64 {
        store
            .create_order(NewOrder::single_line(customer_id, 7, 1, Decimal::new(1000, 2)))
            .await
            .unwrap()
            .outbox_id
    }

    #[tokio::test]
    async fn test_publish_claimed_publishes_once() {
        let (store, broker, relay) = setup().await;
        let id = place(&store, 1).await;

        assert!(relay.publish_claimed(id).await.unwrap());
        assert!(!relay.publish_claimed(id).await.unwrap());

        assert_eq!(broker.len("OrderQueue"), 1);
        assert_eq!(store.outbox_messages().await[0].status, OutboxStatus::Published);
    }

    #[tokio::test]
    async fn test_failed_publish_is_left_for_the_drain() {
        let (store, broker, relay) = setup().await;
        let id = place(&store, 1).await;

        broker.sever_connections();
        broker.set_reachable(false);
        assert!(matches!(relay.publish_claimed(id).await, Err(RelayError::Broker(_))));

        let pending = &store.outbox_messages().await[0];
        assert_eq!(pending.status, OutboxStatus::Pending);
        assert_eq!(pending.attempts, 1);

        broker.set_reachable(true);
        let report = relay.drain().await.unwrap();
        assert_eq!(report, DrainReport { claimed: 1, published: 1, released: 0 });
        assert_eq!(broker.len("OrderQueue"), 1);
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_failure_and_releases_the_rest() {
        let (store, broker, relay) = setup().await;
        place(&store, 1).await;
        place(&store, 2).await;

        broker.set_reachable(false);
        broker.sever_connections();
        let report = relay.drain().await.unwrap();

        assert_eq!(report, DrainReport { claimed: 2, published: 0, released: 2 });
        assert!(store
            .outbox_messages()
            .await
            .iter()
            .all(|message| message.status == OutboxStatus::Pending));
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let (store, broker, relay) = setup().await;
        place(&store, 1).await;

        let token = CancellationToken::new();
        let relay = Arc::new(relay);
        let task = tokio::spawn({
            let relay = relay.clone();
            let token = token.clone();
            async move { relay.run(token).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(broker.len("OrderQueue"), 1);
    }
}
