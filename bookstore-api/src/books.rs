use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use bookstore_core::repository::BookRepository;
use bookstore_core::Book;
use bookstore_shared::BookId;
use std::sync::Arc;

use crate::error::AppError;

pub fn routes(books: Arc<dyn BookRepository>) -> Router {
    Router::new()
        .route("/api/books/{id}", get(get_book))
        .with_state(books)
}

/// GET /api/books/{id}
/// The lookup other services use to price and stock-check orders.
async fn get_book(
    State(books): State<Arc<dyn BookRepository>>,
    Path(id): Path<BookId>,
) -> Result<Json<Book>, AppError> {
    books
        .get_book(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Book {id} not found")))
}
