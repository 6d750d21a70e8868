use async_trait::async_trait;
use bookstore_core::repository::BookRepository;
use bookstore_core::StockApplication;
use bookstore_shared::{EventContract, PaymentProcessed, Queue};
use bookstore_store::{ConsumeError, MessageHandler, Publisher};
use std::sync::Arc;
use tracing::{info, warn};

/// Applies the stock decrements of each paid order exactly once.
pub struct StockConsumer {
    books: Arc<dyn BookRepository>,
}

impl StockConsumer {
    pub fn new(books: Arc<dyn BookRepository>) -> Self {
        Self { books }
    }
}

#[async_trait]
impl MessageHandler for StockConsumer {
    fn queue(&self) -> Queue {
        PaymentProcessed::QUEUE
    }

    async fn handle(&self, payload: &[u8], _publisher: &Publisher) -> Result<(), ConsumeError> {
        let event = PaymentProcessed::decode(payload)?;

        match self.books.apply_stock_decrements(event.order_id, &event.items).await? {
            StockApplication::Applied { decremented, skipped } => {
                for change in &decremented {
                    info!(
                        order_id = event.order_id,
                        book_id = change.book_id,
                        quantity = change.quantity,
                        remaining = change.remaining,
                        "Stock decremented"
                    );
                }
                if !skipped.is_empty() {
                    warn!(order_id = event.order_id, ?skipped, "Unknown books skipped");
                }
            }
            StockApplication::AlreadyApplied => {
                info!(order_id = event.order_id, "Stock already applied for order, ignoring");
            }
        }
        Ok(())
    }
}
