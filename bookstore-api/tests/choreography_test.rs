use bookstore_api::state::{assemble, Runtime, Stores};
use bookstore_core::repository::PaymentRepository;
use bookstore_core::{Book, PaymentStatus};
use bookstore_shared::{EventContract, PaymentProcessed};
use bookstore_store::app_config::Config;
use bookstore_store::{
    Connection, Connector, InMemoryBroker, MemoryBookStore, MemoryOrderStore, MemoryPaymentStore,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

struct Harness {
    broker: InMemoryBroker,
    orders: Arc<MemoryOrderStore>,
    payments: Arc<MemoryPaymentStore>,
    books: Arc<MemoryBookStore>,
    runtime: Runtime,
}

fn harness() -> Harness {
    let broker = InMemoryBroker::new();
    let orders = Arc::new(MemoryOrderStore::new());
    let payments = Arc::new(MemoryPaymentStore::new());
    let books = Arc::new(MemoryBookStore::with_books([Book {
        id: 7,
        title: "Dune".into(),
        author: "Frank Herbert".into(),
        price: Decimal::new(1000, 2),
        stock: 40,
    }]));

    let stores = Stores {
        orders: orders.clone(),
        outbox: orders.clone(),
        payments: payments.clone(),
        books: books.clone(),
    };
    let mut config = Config::default();
    config.consumer.retry_delay_ms = 5;
    config.consumer.reconnect_initial_ms = 5;
    config.outbox.poll_interval_ms = 20;
    let runtime = assemble(&config, stores, Arc::new(broker.clone())).unwrap();

    Harness {
        broker,
        orders,
        payments,
        books,
        runtime,
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("choreography did not settle in time");
}

#[tokio::test]
async fn test_order_flows_through_payment_to_stock() {
    let mut h = harness();
    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for host in std::mem::take(&mut h.runtime.hosts) {
        let token = token.clone();
        tasks.spawn(async move { host.run(token).await });
    }

    let service = h.runtime.state.orders.clone().unwrap();
    let order = service.place_order(3, 7, 2).await.unwrap();
    assert_eq!(order.total_price, Decimal::new(2000, 2));

    let books = h.books.clone();
    eventually(|| {
        let books = books.clone();
        async move { books.stock(7).await == Some(38) }
    })
    .await;

    let payment = h.payments.find_by_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.amount, Decimal::new(2000, 2));
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.user_id, 3);

    // the relay marked the outbox row once the broker took the message
    assert!(h.orders.outbox_messages().await.iter().all(|m| m.published_at.is_some()));

    // redelivered events are absorbed by the dedupe in each consumer
    let producer = h.broker.connect().await.unwrap();
    let placed = order.placed_event();
    producer
        .publish("OrderQueue", placed.encode().unwrap().as_bytes())
        .await
        .unwrap();
    let processed = PaymentProcessed::for_order(&placed, Utc::now());
    producer
        .publish("EditBookCount", processed.encode().unwrap().as_bytes())
        .await
        .unwrap();

    let broker = h.broker.clone();
    eventually(|| {
        let broker = broker.clone();
        async move {
            ["OrderQueue", "EditBookCount"]
                .iter()
                .all(|q| broker.is_empty(q) && broker.unacked_len(q) == 0)
        }
    })
    .await;

    assert_eq!(h.books.stock(7).await, Some(38));
    assert_eq!(h.payments.payment_count().await, 1);
    assert!(h.broker.is_empty("OrderQueue.dead-letter"));
    assert!(h.broker.is_empty("EditBookCount.dead-letter"));

    token.cancel();
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_order_survives_broker_outage_and_is_relayed_later() {
    let mut h = harness();
    h.broker.set_reachable(false);

    let service = h.runtime.state.orders.clone().unwrap();
    let order = service.place_order(3, 7, 1).await.unwrap();
    assert_eq!(h.orders.order_count().await, 1);
    assert!(h.orders.outbox_messages().await[0].published_at.is_none());

    h.broker.set_reachable(true);
    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for host in std::mem::take(&mut h.runtime.hosts) {
        let token = token.clone();
        tasks.spawn(async move { host.run(token).await.map_err(|e| e.to_string()) });
    }
    let relay = h.runtime.relay.clone().unwrap();
    let relay_token = token.clone();
    tasks.spawn(async move {
        relay.run(relay_token).await;
        Ok(())
    });

    let books = h.books.clone();
    eventually(|| {
        let books = books.clone();
        async move { books.stock(7).await == Some(39) }
    })
    .await;
    assert!(h.payments.find_by_order(order.id).await.unwrap().is_some());

    token.cancel();
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }
}
