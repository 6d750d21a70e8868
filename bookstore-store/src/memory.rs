//! In-process implementations of every repository.
//!
//! Used by the single-process `all` role and as test doubles. Each store can
//! be switched into a failing mode to exercise storage error paths.

use async_trait::async_trait;
use bookstore_core::repository::{
    BookRepository, OrderRepository, OutboxRepository, PaymentRepository,
};
use bookstore_core::{
    Book, NewOrder, NewPayment, Order, OrderStatus, OutboxMessage, OutboxStatus, Payment,
    PaymentRecord, PlacedOrder, StockApplication, StockChange, StoreError, StoreResult,
};
use bookstore_shared::{BookId, EventContract, OrderId, OrderLine, OrderPlaced};
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::warn;

fn check(failing: &AtomicBool) -> StoreResult<()> {
    if failing.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable("in-memory store switched off".into()));
    }
    Ok(())
}

#[derive(Default)]
struct OrderTables {
    next_order_id: OrderId,
    next_outbox_id: i64,
    orders: BTreeMap<OrderId, Order>,
    outbox: BTreeMap<i64, OutboxMessage>,
}

/// Orders and their outbox rows, committed together.
#[derive(Default)]
pub struct MemoryOrderStore {
    tables: Mutex<OrderTables>,
    failing: AtomicBool,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.tables.lock().await.outbox.values().cloned().collect()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> StoreResult<PlacedOrder> {
        check(&self.failing)?;
        let mut tables = self.tables.lock().await;

        tables.next_order_id += 1;
        let committed = Order {
            id: tables.next_order_id,
            customer_id: order.customer_id,
            items: order.items,
            total_price: order.total_price,
            status: OrderStatus::Pending,
            created_at: order.created_at,
        };
        let payload = committed
            .placed_event()
            .encode()
            .map_err(|e| StoreError::Corrupt(format!("cannot encode order {}: {}", committed.id, e)))?;

        tables.next_outbox_id += 1;
        let outbox_id = tables.next_outbox_id;
        tables.outbox.insert(
            outbox_id,
            OutboxMessage {
                id: outbox_id,
                queue: OrderPlaced::QUEUE.name().to_string(),
                payload,
                status: OutboxStatus::Pending,
                attempts: 0,
                last_error: None,
                created_at: Utc::now(),
                claimed_at: None,
                published_at: None,
            },
        );
        tables.orders.insert(committed.id, committed.clone());

        Ok(PlacedOrder {
            order: committed,
            outbox_id,
        })
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        check(&self.failing)?;
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }
}

#[async_trait]
impl OutboxRepository for MemoryOrderStore {
    async fn claim(&self, id: i64, lease: Duration) -> StoreResult<Option<OutboxMessage>> {
        check(&self.failing)?;
        let now = Utc::now();
        let mut tables = self.tables.lock().await;

        match tables.outbox.get_mut(&id) {
            Some(message) if message.claimable(now, lease) => {
                message.status = OutboxStatus::InFlight;
                message.claimed_at = Some(now);
                Ok(Some(message.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn claim_batch(&self, limit: i64, lease: Duration) -> StoreResult<Vec<OutboxMessage>> {
        check(&self.failing)?;
        let now = Utc::now();
        let mut tables = self.tables.lock().await;

        let limit = usize::try_from(limit).unwrap_or(0);
        let mut claimed = Vec::new();
        for message in tables.outbox.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if message.claimable(now, lease) {
                message.status = OutboxStatus::InFlight;
                message.claimed_at = Some(now);
                claimed.push(message.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_published(&self, id: i64) -> StoreResult<()> {
        check(&self.failing)?;
        if let Some(message) = self.tables.lock().await.outbox.get_mut(&id) {
            message.status = OutboxStatus::Published;
            message.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn release(&self, id: i64, error: &str) -> StoreResult<()> {
        check(&self.failing)?;
        if let Some(message) = self.tables.lock().await.outbox.get_mut(&id) {
            if message.status == OutboxStatus::InFlight {
                message.status = OutboxStatus::Pending;
                message.claimed_at = None;
                message.attempts += 1;
                message.last_error = Some(error.to_string());
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct PaymentTables {
    next_id: i64,
    by_order: HashMap<OrderId, Payment>,
}

#[derive(Default)]
pub struct MemoryPaymentStore {
    tables: Mutex<PaymentTables>,
    failing: AtomicBool,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn payment_count(&self) -> usize {
        self.tables.lock().await.by_order.len()
    }
}

#[async_trait]
impl PaymentRepository for MemoryPaymentStore {
    async fn record_payment(&self, payment: NewPayment) -> StoreResult<PaymentRecord> {
        check(&self.failing)?;
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables.by_order.get(&payment.order_id) {
            return Ok(PaymentRecord::AlreadyRecorded(existing.clone()));
        }

        tables.next_id += 1;
        let stored = Payment {
            id: tables.next_id,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            status: payment.status,
            method: payment.method,
            created_at: payment.created_at,
        };
        tables.by_order.insert(stored.order_id, stored.clone());
        Ok(PaymentRecord::Created(stored))
    }

    async fn find_by_order(&self, order_id: OrderId) -> StoreResult<Option<Payment>> {
        check(&self.failing)?;
        Ok(self.tables.lock().await.by_order.get(&order_id).cloned())
    }
}

#[derive(Default)]
struct BookTables {
    books: HashMap<BookId, Book>,
    processed_orders: HashSet<OrderId>,
}

#[derive(Default)]
pub struct MemoryBookStore {
    tables: Mutex<BookTables>,
    failing: AtomicBool,
}

impl MemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_books(books: impl IntoIterator<Item = Book>) -> Self {
        let tables = BookTables {
            books: books.into_iter().map(|book| (book.id, book)).collect(),
            processed_orders: HashSet::new(),
        };
        Self {
            tables: Mutex::new(tables),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn stock(&self, id: BookId) -> Option<i32> {
        self.tables.lock().await.books.get(&id).map(|book| book.stock)
    }
}

#[async_trait]
impl BookRepository for MemoryBookStore {
    async fn get_book(&self, id: BookId) -> StoreResult<Option<Book>> {
        check(&self.failing)?;
        Ok(self.tables.lock().await.books.get(&id).cloned())
    }

    async fn apply_stock_decrements(
        &self,
        order_id: OrderId,
        items: &[OrderLine],
    ) -> StoreResult<StockApplication> {
        check(&self.failing)?;
        let mut tables = self.tables.lock().await;

        if tables.processed_orders.contains(&order_id) {
            return Ok(StockApplication::AlreadyApplied);
        }

        // Stage every line first so an out-of-range line leaves nothing applied.
        let mut staged: HashMap<BookId, i32> = HashMap::new();
        let mut decremented = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();
        for line in items {
            let Some(book) = tables.books.get(&line.book_id) else {
                skipped.push(line.book_id);
                continue;
            };
            let current = staged.get(&book.id).copied().unwrap_or(book.stock);
            let remaining = current.checked_sub(line.quantity).ok_or_else(|| {
                StoreError::Rejected(format!(
                    "stock of book {} out of range: {} - {}",
                    book.id, current, line.quantity
                ))
            })?;
            staged.insert(book.id, remaining);
            decremented.push(StockChange {
                book_id: book.id,
                quantity: line.quantity,
                remaining,
            });
        }

        tables.processed_orders.insert(order_id);
        for (book_id, stock) in staged {
            if let Some(book) = tables.books.get_mut(&book_id) {
                book.stock = stock;
                if stock < 0 {
                    warn!(order_id, book_id, remaining = stock, "Stock went negative");
                }
            }
        }

        Ok(StockApplication::Applied {
            decremented,
            skipped,
        })
    }
}
