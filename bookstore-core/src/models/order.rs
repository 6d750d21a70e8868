use bookstore_shared::{BookId, CustomerId, OrderId, OrderLine, OrderPlaced};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order status in the lifecycle. The choreography only ever writes `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(OrderStatus::Pending),
            "Paid" => Some(OrderStatus::Paid),
            "Cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// A committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderLine>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// The event announcing this order, stamped with its commit time.
    pub fn placed_event(&self) -> OrderPlaced {
        OrderPlaced {
            order_id: self.id,
            customer_id: self.customer_id,
            total_price: self.total_price,
            items: self.items.clone(),
            created_at_utc: self.created_at,
        }
    }
}

/// An order that has been validated but not yet assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub items: Vec<OrderLine>,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn single_line(
        customer_id: CustomerId,
        book_id: BookId,
        quantity: i32,
        unit_price: Decimal,
    ) -> Self {
        let line = OrderLine::new(book_id, quantity, unit_price);
        Self {
            customer_id,
            total_price: line.line_total(),
            items: vec![line],
            created_at: Utc::now(),
        }
    }
}

/// Result of committing an order together with its outbox row.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    pub outbox_id: i64,
}
