use async_trait::async_trait;
use bookstore_core::repository::BookRepository;
use bookstore_core::{BookSummary, CatalogClient, CatalogError};
use bookstore_shared::BookId;
use std::sync::Arc;

/// Answers catalog lookups straight from the book store, for deployments
/// where ordering and catalog share a process.
pub struct RepositoryCatalog {
    books: Arc<dyn BookRepository>,
}

impl RepositoryCatalog {
    pub fn new(books: Arc<dyn BookRepository>) -> Self {
        Self { books }
    }
}

#[async_trait]
impl CatalogClient for RepositoryCatalog {
    async fn get_book(&self, id: BookId) -> Result<Option<BookSummary>, CatalogError> {
        let book = self
            .books
            .get_book(id)
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
        Ok(book.map(|book| book.summary()))
    }
}
