use async_trait::async_trait;
use bookstore_core::repository::OrderRepository;
use bookstore_core::{NewOrder, Order, OrderStatus, PlacedOrder, StoreError, StoreResult};
use bookstore_shared::{EventContract, OrderId, OrderLine, OrderPlaced};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

pub struct StoreOrderRepository {
    pool: PgPool,
}

impl StoreOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    customer_id: i64,
    total_price: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderLineRow {
    book_id: i64,
    quantity: i32,
    unit_price: Decimal,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLineRow>) -> StoreResult<Order> {
        let status = OrderStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("order {} has status {}", self.id, self.status)))?;

        Ok(Order {
            id: self.id,
            customer_id: self.customer_id,
            items: lines
                .into_iter()
                .map(|line| OrderLine::new(line.book_id, line.quantity, line.unit_price))
                .collect(),
            total_price: self.total_price,
            status,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl OrderRepository for StoreOrderRepository {
    async fn create_order(&self, order: NewOrder) -> StoreResult<PlacedOrder> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            INSERT INTO orders (customer_id, total_price, status, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, customer_id, total_price, status, created_at
            "#,
        )
        .bind(order.customer_id)
        .bind(order.total_price)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        for line in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, book_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(row.id)
            .bind(line.book_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }

        let committed = Order {
            id: row.id,
            customer_id: row.customer_id,
            items: order.items,
            total_price: row.total_price,
            status: OrderStatus::Pending,
            created_at: row.created_at,
        };
        let payload = committed
            .placed_event()
            .encode()
            .map_err(|e| StoreError::Corrupt(format!("cannot encode order {}: {}", committed.id, e)))?;

        let outbox_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox (queue, payload, status, created_at)
            VALUES ($1, $2, 'Pending', NOW())
            RETURNING id
            "#,
        )
        .bind(OrderPlaced::QUEUE.name())
        .bind(payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::backend)?;

        tx.commit().await.map_err(StoreError::backend)?;

        Ok(PlacedOrder {
            order: committed,
            outbox_id,
        })
    }

    async fn get_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, customer_id, total_price, status, created_at FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, OrderLineRow>(
            "SELECT book_id, quantity, unit_price FROM order_lines WHERE order_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        row.into_order(lines).map(Some)
    }
}
