use async_trait::async_trait;
use bookstore_shared::BookId;

use crate::models::book::BookSummary;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("catalog returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Read-only lookup the order service uses to price and check an order.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_book(&self, id: BookId) -> Result<Option<BookSummary>, CatalogError>;
}
