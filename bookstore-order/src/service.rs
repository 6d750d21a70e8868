use bookstore_core::repository::OrderRepository;
use bookstore_core::{CatalogClient, CatalogError, NewOrder, Order, StoreError};
use bookstore_shared::{BookId, CustomerId, OrderId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::relay::OutboxRelay;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Insufficient stock for book {book_id}: requested {requested}, available {available}")]
    Conflict {
        book_id: BookId,
        requested: i32,
        available: i32,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),
}

/// Accepts orders and hands them to the outbox.
///
/// A returned order is committed and has a pending `OrderPlaced` message; it
/// has not necessarily reached the broker yet.
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogClient>,
    relay: Arc<OutboxRelay>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogClient>,
        relay: Arc<OutboxRelay>,
    ) -> Self {
        Self {
            orders,
            catalog,
            relay,
        }
    }

    pub async fn place_order(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
        quantity: i32,
    ) -> Result<Order, OrderError> {
        info!(customer_id, book_id, quantity, "Placing order");
        if quantity <= 0 {
            return Err(OrderError::Validation(format!(
                "quantity must be greater than zero, got {quantity}"
            )));
        }

        let book = self
            .catalog
            .get_book(book_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("Book {book_id}")))?;

        if quantity > book.stock {
            return Err(OrderError::Conflict {
                book_id,
                requested: quantity,
                available: book.stock,
            });
        }

        let placed = self
            .orders
            .create_order(NewOrder::single_line(customer_id, book_id, quantity, book.price))
            .await?;
        let order = placed.order;
        info!(order_id = order.id, total = %order.total_price, "Order committed");

        match self.relay.publish_claimed(placed.outbox_id).await {
            Ok(true) => info!(order_id = order.id, "OrderPlaced published"),
            Ok(false) => {}
            Err(e) => warn!(
                order_id = order.id,
                outbox_id = placed.outbox_id,
                error = %e,
                "OrderPlaced not published yet, left for the outbox relay"
            ),
        }

        Ok(order)
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order, OrderError> {
        self.orders
            .get_order(id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("Order {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::OutboxSettings;
    use async_trait::async_trait;
    use bookstore_core::{BookSummary, OrderStatus, OutboxStatus};
    use bookstore_shared::{EventContract, OrderPlaced};
    use bookstore_store::broker::Connector;
    use bookstore_store::{declare_topology, InMemoryBroker, ManagedConnection, MemoryOrderStore, Publisher};
    use rust_decimal::Decimal;
    use std::collections::HashMap;

    struct FixedCatalog(HashMap<BookId, BookSummary>);

    #[async_trait]
    impl CatalogClient for FixedCatalog {
        async fn get_book(&self, id: BookId) -> Result<Option<BookSummary>, CatalogError> {
            Ok(self.0.get(&id).cloned())
        }
    }

    struct DownCatalog;

    #[async_trait]
    impl CatalogClient for DownCatalog {
        async fn get_book(&self, _id: BookId) -> Result<Option<BookSummary>, CatalogError> {
            Err(CatalogError::Unavailable("connection refused".into()))
        }
    }

    struct Fixture {
        store: Arc<MemoryOrderStore>,
        broker: InMemoryBroker,
        service: OrderService,
    }

    async fn fixture_with(catalog: Arc<dyn CatalogClient>) -> Fixture {
        let store = Arc::new(MemoryOrderStore::new());
        let broker = InMemoryBroker::new();
        declare_topology(broker.connect().await.unwrap().as_ref()).await.unwrap();
        let publisher = Publisher::new(Arc::new(ManagedConnection::new(Arc::new(broker.clone()))));
        let relay = Arc::new(OutboxRelay::new(store.clone(), publisher, OutboxSettings::default()));
        let service = OrderService::new(store.clone(), catalog, relay);
        Fixture { store, broker, service }
    }

    async fn fixture() -> Fixture {
        let book = BookSummary {
            id: 7,
            price: Decimal::new(1000, 2),
            stock: 5,
        };
        fixture_with(Arc::new(FixedCatalog(HashMap::from([(7, book)])))).await
    }

    #[tokio::test]
    async fn test_valid_order_is_committed_then_published() {
        let f = fixture().await;

        let order = f.service.place_order(3, 7, 2).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_price, Decimal::new(2000, 2));
        assert_eq!(f.store.order_count().await, 1);

        let messages = f.broker.messages("OrderQueue");
        assert_eq!(messages.len(), 1);
        let event = OrderPlaced::decode(&messages[0]).unwrap();
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.total_price, Decimal::new(2000, 2));
        assert_eq!(event.items[0].unit_price, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn test_non_positive_quantity_is_rejected() {
        let f = fixture().await;

        for quantity in [0, -1] {
            let err = f.service.place_order(3, 7, quantity).await.unwrap_err();
            assert!(matches!(err, OrderError::Validation(_)));
        }
        assert_eq!(f.store.order_count().await, 0);
        assert!(f.broker.is_empty("OrderQueue"));
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_a_conflict() {
        let f = fixture().await;

        let err = f.service.place_order(3, 7, 6).await.unwrap_err();
        assert!(matches!(err, OrderError::Conflict { requested: 6, available: 5, .. }));
        assert_eq!(f.store.order_count().await, 0);
        assert!(f.broker.is_empty("OrderQueue"));
    }

    #[tokio::test]
    async fn test_unknown_book_is_not_found() {
        let f = fixture().await;
        assert!(matches!(f.service.place_order(3, 8, 1).await, Err(OrderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_catalog_outage_fails_the_request() {
        let f = fixture_with(Arc::new(DownCatalog)).await;
        assert!(matches!(f.service.place_order(3, 7, 1).await, Err(OrderError::Catalog(_))));
        assert_eq!(f.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_publishes_nothing() {
        let f = fixture().await;
        f.store.set_failing(true);

        assert!(matches!(f.service.place_order(3, 7, 1).await, Err(OrderError::Storage(_))));
        assert!(f.broker.is_empty("OrderQueue"));
    }

    #[tokio::test]
    async fn test_broker_outage_still_accepts_the_order() {
        let f = fixture().await;
        f.broker.sever_connections();
        f.broker.set_reachable(false);

        let order = f.service.place_order(3, 7, 1).await.unwrap();

        let outbox = f.store.outbox_messages().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].status, OutboxStatus::Pending);
        assert_eq!(f.service.get_order(order.id).await.unwrap(), order);
    }

    #[tokio::test]
    async fn test_get_missing_order_is_not_found() {
        let f = fixture().await;
        assert!(matches!(f.service.get_order(42).await, Err(OrderError::NotFound(_))));
    }
}
