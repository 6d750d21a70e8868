use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::queues::Queue;
use crate::{BookId, CustomerId, OrderId};

/// A single ordered book, carried unchanged from order to stock decrement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub book_id: BookId,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn new(book_id: BookId, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            book_id,
            quantity,
            unit_price,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Snapshot of a committed order, published on `OrderQueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
    pub items: Vec<OrderLine>,
    pub created_at_utc: DateTime<Utc>,
}

/// Snapshot of a recorded payment, published on `EditBookCount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessed {
    pub order_id: OrderId,
    pub items: Vec<OrderLine>,
    pub processed_at_utc: DateTime<Utc>,
}

impl PaymentProcessed {
    /// Carries the order's line items forward once its payment is recorded.
    pub fn for_order(order: &OrderPlaced, processed_at_utc: DateTime<Utc>) -> Self {
        Self {
            order_id: order.order_id,
            items: order.items.clone(),
            processed_at_utc,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed {contract} payload: {source}")]
    Malformed {
        contract: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{contract} for order {order_id} carries no line items")]
    NoItems {
        contract: &'static str,
        order_id: OrderId,
    },

    #[error("{contract} line for book {book_id} has non-positive quantity {quantity}")]
    InvalidQuantity {
        contract: &'static str,
        book_id: BookId,
        quantity: i32,
    },
}

/// Binds a payload type to the queue it travels on.
///
/// Decoding rejects missing or mistyped fields and empty or non-positive line
/// items; unknown fields are ignored.
pub trait EventContract: Serialize + DeserializeOwned + Send + Sync {
    const QUEUE: Queue;
    const NAME: &'static str;

    fn order_id(&self) -> OrderId;

    fn items(&self) -> &[OrderLine];

    fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError>
    where
        Self: Sized,
    {
        let text = std::str::from_utf8(payload)?;
        let event: Self = serde_json::from_str(text).map_err(|source| DecodeError::Malformed {
            contract: Self::NAME,
            source,
        })?;

        if event.items().is_empty() {
            return Err(DecodeError::NoItems {
                contract: Self::NAME,
                order_id: event.order_id(),
            });
        }
        if let Some(line) = event.items().iter().find(|line| line.quantity <= 0) {
            return Err(DecodeError::InvalidQuantity {
                contract: Self::NAME,
                book_id: line.book_id,
                quantity: line.quantity,
            });
        }

        Ok(event)
    }
}

impl EventContract for OrderPlaced {
    const QUEUE: Queue = Queue::OrderPlaced;
    const NAME: &'static str = "OrderPlaced";

    fn order_id(&self) -> OrderId {
        self.order_id
    }

    fn items(&self) -> &[OrderLine] {
        &self.items
    }
}

impl EventContract for PaymentProcessed {
    const QUEUE: Queue = Queue::PaymentProcessed;
    const NAME: &'static str = "PaymentProcessed";

    fn order_id(&self) -> OrderId {
        self.order_id
    }

    fn items(&self) -> &[OrderLine] {
        &self.items
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The payload can never be processed.
    Poison,
    /// Processing kept failing until the retry limit was reached.
    RetriesExhausted,
}

/// Envelope written to `<queue>.dead-letter` for messages taken out of the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub queue: String,
    pub reason: DeadLetterReason,
    pub error: String,
    pub attempts: u32,
    pub payload: String,
    pub failed_at_utc: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        queue: Queue,
        reason: DeadLetterReason,
        error: impl ToString,
        attempts: u32,
        payload: &[u8],
    ) -> Self {
        Self {
            queue: queue.name().to_string(),
            reason,
            error: error.to_string(),
            attempts,
            payload: String::from_utf8_lossy(payload).into_owned(),
            failed_at_utc: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn sample_order() -> OrderPlaced {
        OrderPlaced {
            order_id: 41,
            customer_id: 3,
            total_price: dec("20.00"),
            items: vec![OrderLine::new(7, 2, dec("10.00"))],
            created_at_utc: "2026-03-01T12:30:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_order_placed_round_trip() {
        let event = sample_order();
        let wire = event.encode().unwrap();

        let decoded = OrderPlaced::decode(wire.as_bytes()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_wire_field_names() {
        let wire: serde_json::Value = serde_json::from_str(&sample_order().encode().unwrap()).unwrap();

        assert_eq!(wire["orderId"], json!(41));
        assert_eq!(wire["customerId"], json!(3));
        assert_eq!(wire["totalPrice"], json!(20.0));
        assert_eq!(wire["items"][0]["bookId"], json!(7));
        assert_eq!(wire["items"][0]["quantity"], json!(2));
        assert_eq!(wire["items"][0]["unitPrice"], json!(10.0));
        assert_eq!(wire["createdAtUtc"], json!("2026-03-01T12:30:00Z"));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let payload = json!({
            "orderId": 5,
            "items": [{"bookId": 1, "quantity": 1, "unitPrice": 4.5, "title": "Dune"}],
            "processedAtUtc": "2026-03-01T12:30:00Z",
            "correlationId": "abc"
        });

        let event = PaymentProcessed::decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.order_id, 5);
        assert_eq!(event.items[0].unit_price, dec("4.5"));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let payload = json!({
            "orderId": 5,
            "customerId": 2,
            "items": [{"bookId": 1, "quantity": 1, "unitPrice": 4.5}],
            "createdAtUtc": "2026-03-01T12:30:00Z"
        });

        let err = OrderPlaced::decode(payload.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { contract: "OrderPlaced", .. }));
    }

    #[test]
    fn test_empty_and_invalid_lines_are_rejected() {
        let empty = json!({"orderId": 9, "items": [], "processedAtUtc": "2026-03-01T12:30:00Z"});
        assert!(matches!(
            PaymentProcessed::decode(empty.to_string().as_bytes()),
            Err(DecodeError::NoItems { order_id: 9, .. })
        ));

        let negative = json!({
            "orderId": 9,
            "items": [{"bookId": 4, "quantity": -3, "unitPrice": 1.0}],
            "processedAtUtc": "2026-03-01T12:30:00Z"
        });
        assert!(matches!(
            PaymentProcessed::decode(negative.to_string().as_bytes()),
            Err(DecodeError::InvalidQuantity { book_id: 4, quantity: -3, .. })
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(OrderPlaced::decode(b"not json"), Err(DecodeError::Malformed { .. })));
        assert!(matches!(OrderPlaced::decode(&[0xff, 0xfe]), Err(DecodeError::Utf8(_))));
    }

    #[test]
    fn test_payment_processed_carries_items_forward() {
        let order = sample_order();
        let processed = PaymentProcessed::for_order(&order, Utc::now());

        assert_eq!(processed.order_id, 41);
        assert_eq!(processed.items, order.items);
    }

    #[test]
    fn test_dead_letter_keeps_payload_text() {
        let letter = DeadLetter::new(Queue::OrderPlaced, DeadLetterReason::Poison, "bad", 1, b"{oops");
        let wire: serde_json::Value = serde_json::to_value(&letter).unwrap();

        assert_eq!(wire["queue"], json!("OrderQueue"));
        assert_eq!(wire["reason"], json!("poison"));
        assert_eq!(wire["payload"], json!("{oops"));
    }
}
