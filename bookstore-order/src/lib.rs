//! Order intake: validates and commits orders, then announces them on
//! `OrderQueue` through the transactional outbox.

pub mod catalog_client;
pub mod relay;
pub mod service;

pub use catalog_client::HttpCatalogClient;
pub use relay::{DrainReport, OutboxRelay, OutboxSettings, RelayError};
pub use service::{OrderError, OrderService};
