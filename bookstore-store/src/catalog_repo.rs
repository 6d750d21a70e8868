use async_trait::async_trait;
use bookstore_core::repository::BookRepository;
use bookstore_core::{Book, StockApplication, StockChange, StoreError, StoreResult};
use bookstore_shared::{BookId, OrderId, OrderLine};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;

pub struct StoreBookRepository {
    pool: PgPool,
}

impl StoreBookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookRow {
    id: i64,
    title: String,
    author: String,
    price: Decimal,
    stock: i32,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            id: row.id,
            title: row.title,
            author: row.author,
            price: row.price,
            stock: row.stock,
        }
    }
}

/// Postgres `numeric_value_out_of_range`.
const OUT_OF_RANGE: &str = "22003";

fn stock_update_error(err: sqlx::Error) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.code().as_deref() == Some(OUT_OF_RANGE) => {
            StoreError::Rejected(db.message().to_string())
        }
        _ => StoreError::backend(err),
    }
}

#[async_trait]
impl BookRepository for StoreBookRepository {
    async fn get_book(&self, id: BookId) -> StoreResult<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(
            "SELECT id, title, author, price, stock FROM books WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(row.map(Book::from))
    }

    async fn apply_stock_decrements(
        &self,
        order_id: OrderId,
        items: &[OrderLine],
    ) -> StoreResult<StockApplication> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let first_time = sqlx::query(
            "INSERT INTO processed_orders (order_id) VALUES ($1) ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?
        .rows_affected()
            == 1;

        if !first_time {
            tx.rollback().await.map_err(StoreError::backend)?;
            return Ok(StockApplication::AlreadyApplied);
        }

        let mut decremented = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();

        for line in items {
            let remaining: Option<i32> = sqlx::query_scalar(
                "UPDATE books SET stock = stock - $2 WHERE id = $1 RETURNING stock",
            )
            .bind(line.book_id)
            .bind(line.quantity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(stock_update_error)?;

            match remaining {
                Some(remaining) => {
                    if remaining < 0 {
                        warn!(order_id, book_id = line.book_id, remaining, "Stock went negative");
                    }
                    decremented.push(StockChange {
                        book_id: line.book_id,
                        quantity: line.quantity,
                        remaining,
                    });
                }
                None => skipped.push(line.book_id),
            }
        }

        tx.commit().await.map_err(StoreError::backend)?;

        Ok(StockApplication::Applied {
            decremented,
            skipped,
        })
    }
}
