pub mod catalog;
pub mod models;
pub mod repository;

pub use catalog::{CatalogClient, CatalogError};
pub use models::book::{Book, BookSummary, StockApplication, StockChange};
pub use models::order::{NewOrder, Order, OrderStatus, PlacedOrder};
pub use models::outbox::{OutboxMessage, OutboxStatus};
pub use models::payment::{NewPayment, Payment, PaymentMethod, PaymentRecord, PaymentStatus};

/// Failure raised by any storage backend.
///
/// Backends keep their own error types; they are boxed here so the domain
/// crates never depend on a driver.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The write breaks a column constraint, such as an integer range.
    #[error("storage rejected the write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
