use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bookstore_core::Order;
use bookstore_order::OrderService;
use bookstore_shared::{BookId, CustomerId, OrderId};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    pub book_id: BookId,
    pub quantity: i32,
}

pub fn routes(service: Arc<OrderService>) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/{id}", get(get_order))
        .with_state(service)
}

/// POST /api/orders
/// The order is accepted as `Pending`; payment and stock follow asynchronously.
async fn create_order(
    State(service): State<Arc<OrderService>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = service
        .place_order(req.customer_id, req.book_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders/{id}
async fn get_order(
    State(service): State<Arc<OrderService>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(service.get_order(id).await?))
}
