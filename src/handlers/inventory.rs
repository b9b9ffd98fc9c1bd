use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::Actor,
    entities::stock_movement::MovementType,
    errors::ServiceError,
    services::stock_ledger::NewMovement,
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordMovementRequest {
    pub movement_type: MovementType,
    /// Positive magnitude; direction comes from the movement type.
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reason: String,
    pub notes: Option<String>,
    /// Optional polymorphic reference: `("supplier", supplier_id)` ties a
    /// stock-in to the delivering supplier, `("order", order_id)` is written
    /// by placement and cancellation. Both fields come together or not at
    /// all.
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/inventory", get(list_inventory_items))
        .route("/inventory/:id", get(get_inventory_item))
        .route(
            "/inventory/:id/movements",
            post(record_movement).get(list_movements),
        )
}

/// GET /inventory, items with derived stock status.
async fn list_inventory_items(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (items, total) = state
        .services
        .stock_ledger
        .list_inventory_items(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::ok(PaginatedResponse {
        items,
        total,
        page: query.page,
        per_page: query.per_page,
    })))
}

/// GET /inventory/{id}
async fn get_inventory_item(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state.services.stock_ledger.get_inventory_item(id).await?;
    Ok(Json(ApiResponse::ok(item)))
}

/// POST /inventory/{id}/movements for manual stock-in, waste, adjustments.
async fn record_movement(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let reference = match (request.reference_type, request.reference_id) {
        (Some(t), Some(r)) => Some((t, r)),
        (None, None) => None,
        _ => {
            return Err(ServiceError::ValidationError(
                "reference_type and reference_id must be provided together".to_string(),
            ))
        }
    };

    let movement = state
        .services
        .stock_ledger
        .record_movement(NewMovement {
            inventory_item_id: id,
            movement_type: request.movement_type,
            quantity: request.quantity,
            unit_cost: request.unit_cost,
            reason: request.reason,
            notes: request.notes,
            reference,
            actor_id: actor.id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(movement))))
}

/// GET /inventory/{id}/movements, the append-only ledger newest first.
async fn list_movements(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (movements, total) = state
        .services
        .stock_ledger
        .list_movements(id, query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::ok(PaginatedResponse {
        items: movements,
        total,
        page: query.page,
        per_page: query.per_page,
    })))
}
