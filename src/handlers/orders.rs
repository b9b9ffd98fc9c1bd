use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Actor,
    entities::order::OrderStatus,
    errors::ServiceError,
    services::orders::PlaceOrderRequest,
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordPaymentRequest {
    /// Opaque gateway reference, e.g. an M-Pesa confirmation code.
    pub payment_reference: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(place_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/payment", post(record_payment))
}

/// POST /orders: place an order and deduct recipe stock atomically.
async fn place_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placed = state.services.orders.place_order(actor, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(placed))))
}

/// GET /orders, newest first; cashiers only see their own.
async fn list_orders(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(actor, query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::ok(PaginatedResponse {
        items: orders,
        total,
        page: query.page,
        per_page: query.per_page,
    })))
}

/// GET /orders/{id}
async fn get_order(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// PUT /orders/{id}/status
async fn update_order_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .order_status
        .update_status(id, request.status, actor, request.notes)
        .await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// POST /orders/{id}/payment
async fn record_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .record_payment(id, actor, request.payment_reference)
        .await?;
    Ok(Json(ApiResponse::ok(order)))
}
