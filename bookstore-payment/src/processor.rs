use async_trait::async_trait;
use bookstore_core::repository::PaymentRepository;
use bookstore_core::{NewPayment, PaymentMethod, PaymentRecord};
use bookstore_shared::{EventContract, OrderPlaced, PaymentProcessed, Queue};
use bookstore_store::{ConsumeError, MessageHandler, Publisher};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Records a payment for each placed order and passes the order's items on
/// to the catalog.
///
/// Payments are create-or-ignore by order id, so a redelivered `OrderPlaced`
/// never produces a second payment. The follow-up `PaymentProcessed` is
/// published again on redelivery; the stock consumer deduplicates it.
pub struct PaymentProcessor {
    payments: Arc<dyn PaymentRepository>,
    method: PaymentMethod,
}

impl PaymentProcessor {
    pub fn new(payments: Arc<dyn PaymentRepository>, method: PaymentMethod) -> Self {
        Self { payments, method }
    }
}

#[async_trait]
impl MessageHandler for PaymentProcessor {
    fn queue(&self) -> Queue {
        OrderPlaced::QUEUE
    }

    async fn handle(&self, payload: &[u8], publisher: &Publisher) -> Result<(), ConsumeError> {
        let order = OrderPlaced::decode(payload)?;

        let record = self
            .payments
            .record_payment(NewPayment::completed_for(&order, self.method))
            .await?;
        match &record {
            PaymentRecord::Created(payment) => info!(
                order_id = order.order_id,
                payment_id = payment.id,
                amount = %payment.amount,
                "Payment recorded"
            ),
            PaymentRecord::AlreadyRecorded(payment) => warn!(
                order_id = order.order_id,
                payment_id = payment.id,
                "Payment already recorded, republishing PaymentProcessed"
            ),
        }

        publisher
            .publish_event(&PaymentProcessed::for_order(&order, Utc::now()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookstore_core::PaymentStatus;
    use bookstore_shared::OrderLine;
    use bookstore_store::broker::Connector;
    use bookstore_store::{declare_topology, InMemoryBroker, MemoryPaymentStore};
    use rust_decimal::Decimal;

    struct Fixture {
        payments: Arc<MemoryPaymentStore>,
        broker: InMemoryBroker,
        publisher: Publisher,
        processor: PaymentProcessor,
    }

    async fn fixture() -> Fixture {
        let payments = Arc::new(MemoryPaymentStore::new());
        let broker = InMemoryBroker::new();
        let connection = broker.connect().await.unwrap();
        declare_topology(connection.as_ref()).await.unwrap();
        Fixture {
            processor: PaymentProcessor::new(payments.clone(), PaymentMethod::PayPal),
            payments,
            broker,
            publisher: Publisher::new(connection),
        }
    }

    fn order_placed() -> Vec<u8> {
        OrderPlaced {
            order_id: 11,
            customer_id: 3,
            total_price: Decimal::new(2000, 2),
            items: vec![OrderLine::new(7, 2, Decimal::new(1000, 2))],
            created_at_utc: Utc::now(),
        }
        .encode()
        .unwrap()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_payment_is_recorded_and_forwarded() {
        let f = fixture().await;

        f.processor.handle(&order_placed(), &f.publisher).await.unwrap();

        let payment = f.payments.find_by_order(11).await.unwrap().unwrap();
        assert_eq!(payment.amount, Decimal::new(2000, 2));
        assert_eq!(payment.user_id, 3);
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.method, PaymentMethod::PayPal);

        let forwarded = f.broker.messages("EditBookCount");
        assert_eq!(forwarded.len(), 1);
        let event = PaymentProcessed::decode(&forwarded[0]).unwrap();
        assert_eq!(event.order_id, 11);
        assert_eq!(event.items, vec![OrderLine::new(7, 2, Decimal::new(1000, 2))]);
    }

    #[tokio::test]
    async fn test_redelivery_records_one_payment() {
        let f = fixture().await;

        f.processor.handle(&order_placed(), &f.publisher).await.unwrap();
        f.processor.handle(&order_placed(), &f.publisher).await.unwrap();

        assert_eq!(f.payments.payment_count().await, 1);
        assert_eq!(f.broker.len("EditBookCount"), 2);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_poison() {
        let f = fixture().await;

        let err = f.processor.handle(b"{\"orderId\": \"x\"}", &f.publisher).await.unwrap_err();
        assert!(err.is_poison());
        assert_eq!(f.payments.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_transient_and_publishes_nothing() {
        let f = fixture().await;
        f.payments.set_failing(true);

        let err = f.processor.handle(&order_placed(), &f.publisher).await.unwrap_err();
        assert!(matches!(err, ConsumeError::Storage(_)));
        assert!(f.broker.is_empty("EditBookCount"));
    }
}
