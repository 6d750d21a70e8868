use async_trait::async_trait;
use bookstore_shared::{BookId, OrderId, OrderLine};
use chrono::Duration;

use crate::models::book::{Book, StockApplication};
use crate::models::order::{NewOrder, Order, PlacedOrder};
use crate::models::outbox::OutboxMessage;
use crate::models::payment::{NewPayment, Payment, PaymentRecord};
use crate::StoreResult;

/// Repository trait for order data access
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Commits the order and its `OrderPlaced` outbox row atomically.
    async fn create_order(&self, order: NewOrder) -> StoreResult<PlacedOrder>;

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>>;
}

/// Repository trait for the transactional outbox
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Claims one message if it is pending or its lease has lapsed.
    async fn claim(&self, id: i64, lease: Duration) -> StoreResult<Option<OutboxMessage>>;

    /// Claims up to `limit` claimable messages, oldest first.
    async fn claim_batch(&self, limit: i64, lease: Duration) -> StoreResult<Vec<OutboxMessage>>;

    async fn mark_published(&self, id: i64) -> StoreResult<()>;

    /// Returns a claimed message to pending, recording the failure.
    async fn release(&self, id: i64, error: &str) -> StoreResult<()>;
}

/// Repository trait for payment data access
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Create-or-ignore keyed by order id.
    async fn record_payment(&self, payment: NewPayment) -> StoreResult<PaymentRecord>;

    async fn find_by_order(&self, order_id: OrderId) -> StoreResult<Option<Payment>>;
}

/// Repository trait for the catalog's book and stock data
#[async_trait]
pub trait BookRepository: Send + Sync {
    async fn get_book(&self, id: BookId) -> StoreResult<Option<Book>>;

    /// Applies every line's decrement once per order, as one unit.
    async fn apply_stock_decrements(
        &self,
        order_id: OrderId,
        items: &[OrderLine],
    ) -> StoreResult<StockApplication>;
}
