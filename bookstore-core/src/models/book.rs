use bookstore_shared::BookId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog entry. `stock` is only ever changed by the stock consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub stock: i32,
}

impl Book {
    pub fn summary(&self) -> BookSummary {
        BookSummary {
            id: self.id,
            price: self.price,
            stock: self.stock,
        }
    }
}

/// What the order service needs to know about a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: BookId,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub book_id: BookId,
    pub quantity: i32,
    pub remaining: i32,
}

/// Outcome of applying an order's stock decrements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockApplication {
    Applied {
        decremented: Vec<StockChange>,
        /// Books named by the order that the catalog does not know.
        skipped: Vec<BookId>,
    },
    /// The order was already applied; nothing changed.
    AlreadyApplied,
}
