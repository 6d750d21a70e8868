use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use bookstore_core::repository::PaymentRepository;
use bookstore_core::Payment;
use bookstore_shared::OrderId;
use std::sync::Arc;

use crate::error::AppError;

pub fn routes(payments: Arc<dyn PaymentRepository>) -> Router {
    Router::new()
        .route("/api/payments/order/{order_id}", get(get_payment_for_order))
        .with_state(payments)
}

async fn get_payment_for_order(
    State(payments): State<Arc<dyn PaymentRepository>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Payment>, AppError> {
    payments
        .find_by_order(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No payment for order {order_id}")))
}
