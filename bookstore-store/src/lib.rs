pub mod app_config;
pub mod broker;
pub mod catalog_repo;
pub mod database;
pub mod memory;
pub mod order_repo;
pub mod outbox_repo;
pub mod payment_repo;

pub use broker::{
    declare_topology, AckMode, BrokerError, ConsumeError, Connection, Connector, Delivery,
    InMemoryBroker, ManagedConnection, MessageHandler, Publisher, Subscription,
};
pub use catalog_repo::StoreBookRepository;
pub use database::DbClient;
pub use memory::{MemoryBookStore, MemoryOrderStore, MemoryPaymentStore};
pub use order_repo::StoreOrderRepository;
pub use outbox_repo::StoreOutboxRepository;
pub use payment_repo::StorePaymentRepository;
