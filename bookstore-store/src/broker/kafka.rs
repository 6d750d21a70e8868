//! Kafka backend. A queue maps to a topic; manual acks are offset commits.

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

use super::{
    AckMode, Acknowledger, BrokerError, BrokerResult, Connection, Connector, Delivery,
    Subscription,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

fn backend(err: KafkaError) -> BrokerError {
    BrokerError::Backend(err.to_string())
}

pub struct KafkaConnector {
    brokers: String,
    group_id: String,
}

impl KafkaConnector {
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
        }
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    async fn connect(&self) -> BrokerResult<Arc<dyn Connection>> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        Ok(Arc::new(KafkaConnection {
            brokers: self.brokers.clone(),
            group_id: self.group_id.clone(),
            producer,
            admin,
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct KafkaConnection {
    brokers: String,
    group_id: String,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    open: Arc<AtomicBool>,
}

impl KafkaConnection {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl Connection for KafkaConnection {
    async fn declare_queue(&self, name: &str) -> BrokerResult<()> {
        self.ensure_open()?;
        let topic = NewTopic::new(name, 1, TopicReplication::Fixed(1));
        let results = self
            .admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        for result in results {
            match result {
                Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((topic, code)) => {
                    return Err(BrokerError::Backend(format!("cannot create topic {topic}: {code}")));
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        self.ensure_open()?;
        let record = FutureRecord::<(), [u8]>::to(queue).payload(payload);

        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}: partition {} offset {}",
                    queue, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", queue, e);
                Err(BrokerError::Unreachable(e.to_string()))
            }
        }
    }

    async fn subscribe(&self, queue: &str, mode: AckMode) -> BrokerResult<Box<dyn Subscription>> {
        self.ensure_open()?;
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", format!("{}-{}", self.group_id, queue))
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;

        consumer.subscribe(&[queue]).map_err(backend)?;
        info!(queue, "Subscribed to Kafka topic");

        Ok(Box::new(KafkaSubscription {
            consumer: Arc::new(consumer),
            queue: queue.to_string(),
            mode,
            open: self.open.clone(),
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

type Attempts = Arc<Mutex<HashMap<(i32, i64), u32>>>;

struct KafkaSubscription {
    consumer: Arc<StreamConsumer>,
    queue: String,
    mode: AckMode,
    open: Arc<AtomicBool>,
    attempts: Attempts,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self) -> Option<BrokerResult<Delivery>> {
        if !self.open.load(Ordering::SeqCst) {
            return None;
        }

        let (partition, offset, payload) = match self.consumer.recv().await {
            Ok(message) => (
                message.partition(),
                message.offset(),
                message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            ),
            Err(e) => return Some(Err(BrokerError::Unreachable(e.to_string()))),
        };

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
            let seen = attempts.entry((partition, offset)).or_insert(0);
            *seen += 1;
            *seen
        };

        let acker = KafkaAcker {
            consumer: self.consumer.clone(),
            topic: self.queue.clone(),
            partition,
            offset,
            attempts: self.attempts.clone(),
        };

        match self.mode {
            AckMode::Manual => Some(Ok(Delivery::new(self.queue.clone(), payload, attempt, Box::new(acker)))),
            AckMode::Auto => {
                if let Err(e) = acker.commit() {
                    return Some(Err(e));
                }
                Some(Ok(Delivery::auto_acked(self.queue.clone(), payload, attempt)))
            }
        }
    }
}

struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
    attempts: Attempts,
}

impl KafkaAcker {
    /// Queues the offset commit without waiting for the broker to confirm it,
    /// so a crash right after `ack` can redeliver the message. Both consumers
    /// deduplicate by order id, which absorbs that redelivery; a synchronous
    /// commit would block the runtime thread on every message.
    fn commit(&self) -> BrokerResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(backend)?;
        self.consumer.commit(&tpl, CommitMode::Async).map_err(backend)?;
        self.attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(self.partition, self.offset));
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for KafkaAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.commit()
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        if !requeue {
            return self.commit();
        }
        self.consumer
            .seek(&self.topic, self.partition, Offset::Offset(self.offset), Timeout::After(SEND_TIMEOUT))
            .map_err(backend)
    }
}
