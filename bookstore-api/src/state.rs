use anyhow::Context;
use bookstore_catalog::{RepositoryCatalog, StockConsumer};
use bookstore_core::repository::{
    BookRepository, OrderRepository, OutboxRepository, PaymentRepository,
};
use bookstore_core::{Book, CatalogClient};
use bookstore_order::{HttpCatalogClient, OrderService, OutboxRelay, OutboxSettings};
use bookstore_payment::PaymentProcessor;
use bookstore_store::app_config::{BrokerKind, Config, ServiceRole};
use bookstore_store::{
    Connector, DbClient, InMemoryBroker, ManagedConnection, MemoryBookStore, MemoryOrderStore,
    MemoryPaymentStore, Publisher, StoreBookRepository, StoreOrderRepository,
    StoreOutboxRepository, StorePaymentRepository,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::worker::{ConsumerHost, ConsumerSettings};

/// What the HTTP layer serves. Each part is present only when this process
/// runs the matching role.
#[derive(Clone, Default)]
pub struct AppState {
    pub orders: Option<Arc<OrderService>>,
    pub payments: Option<Arc<dyn PaymentRepository>>,
    pub books: Option<Arc<dyn BookRepository>>,
}

/// Everything a service process runs, wired from configuration.
pub struct Runtime {
    pub state: AppState,
    pub hosts: Vec<ConsumerHost>,
    pub relay: Option<Arc<OutboxRelay>>,
    /// Publish connection of the order role, closed on shutdown.
    pub publisher: Option<Publisher>,
}

pub struct Stores {
    pub orders: Arc<dyn OrderRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub books: Arc<dyn BookRepository>,
}

impl Stores {
    pub fn in_memory(seed: impl IntoIterator<Item = Book>) -> Self {
        let orders = Arc::new(MemoryOrderStore::new());
        Self {
            orders: orders.clone(),
            outbox: orders,
            payments: Arc::new(MemoryPaymentStore::new()),
            books: Arc::new(MemoryBookStore::with_books(seed)),
        }
    }

    pub async fn postgres(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = DbClient::new(url, max_connections)
            .await
            .context("Failed to connect to Postgres")?;
        db.migrate().await.context("Failed to run migrations")?;

        Ok(Self {
            orders: Arc::new(StoreOrderRepository::new(db.pool.clone())),
            outbox: Arc::new(StoreOutboxRepository::new(db.pool.clone())),
            payments: Arc::new(StorePaymentRepository::new(db.pool.clone())),
            books: Arc::new(StoreBookRepository::new(db.pool)),
        })
    }
}

fn connector(config: &Config) -> anyhow::Result<Arc<dyn Connector>> {
    match config.broker.kind {
        BrokerKind::Memory => {
            if config.service.role != ServiceRole::All {
                warn!("In-memory broker only reaches consumers inside this process");
            }
            Ok(Arc::new(InMemoryBroker::new()))
        }
        #[cfg(feature = "kafka")]
        BrokerKind::Kafka => Ok(Arc::new(bookstore_store::broker::KafkaConnector::new(
            config.broker.brokers.clone(),
            config.broker.group_id.clone(),
        ))),
        #[cfg(not(feature = "kafka"))]
        BrokerKind::Kafka => anyhow::bail!("broker.kind = \"kafka\" requires building with the `kafka` feature"),
    }
}

/// Wires one process from its configuration and the stores it should use.
pub fn assemble(config: &Config, stores: Stores, connector: Arc<dyn Connector>) -> anyhow::Result<Runtime> {
    let role = config.service.role;
    let settings = ConsumerSettings::from(&config.consumer);
    let mut state = AppState::default();
    let mut hosts = Vec::new();
    let mut relay = None;
    let mut publisher = None;

    if role.runs_orders() {
        let catalog: Arc<dyn CatalogClient> = if role.runs_catalog() {
            Arc::new(RepositoryCatalog::new(stores.books.clone()))
        } else {
            Arc::new(HttpCatalogClient::new(config.catalog.url.clone(), config.catalog.timeout())?)
        };
        let order_publisher = Publisher::new(Arc::new(ManagedConnection::new(connector.clone())));
        let outbox_relay = Arc::new(OutboxRelay::new(
            stores.outbox.clone(),
            order_publisher.clone(),
            OutboxSettings::from(&config.outbox),
        ));
        state.orders = Some(Arc::new(OrderService::new(
            stores.orders.clone(),
            catalog,
            outbox_relay.clone(),
        )));
        relay = Some(outbox_relay);
        publisher = Some(order_publisher);
    }

    if role.runs_payments() {
        let processor = PaymentProcessor::new(stores.payments.clone(), config.payment.method);
        hosts.push(ConsumerHost::new(connector.clone(), Arc::new(processor), settings.clone()));
        state.payments = Some(stores.payments.clone());
    }

    if role.runs_catalog() {
        hosts.push(ConsumerHost::new(
            connector.clone(),
            Arc::new(StockConsumer::new(stores.books.clone())),
            settings,
        ));
        state.books = Some(stores.books.clone());
    }

    Ok(Runtime {
        state,
        hosts,
        relay,
        publisher,
    })
}

/// Builds the runtime for `config`, connecting to Postgres unless the
/// database url selects in-memory stores.
pub async fn build(config: &Config) -> anyhow::Result<Runtime> {
    let stores = if config.database.is_memory() {
        info!(books = config.catalog.seed.len(), "Using in-memory stores");
        let seed = config.catalog.seed.iter().map(|book| Book {
            id: book.id,
            title: book.title.clone(),
            author: book.author.clone(),
            price: book.price,
            stock: book.stock,
        });
        Stores::in_memory(seed)
    } else {
        Stores::postgres(&config.database.url, config.database.max_connections).await?
    };

    assemble(config, stores, connector(config)?)
}
