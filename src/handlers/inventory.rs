use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::Actor,
    errors::ServiceError,
    handlers::common::success_response,
    AppState,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct StockQuantityRequest {
    pub quantity: i32,
}

/// Create the inventory router
pub fn inventory_router() -> Router<AppState> {
    Router::new()
        .route(
            "/:product_id/sites/:site_id",
            get(get_stock_level).put(set_stock_level),
        )
        .route("/:product_id/sites/:site_id/receipts", post(receive_stock))
}

async fn get_stock_level(
    State(state): State<AppState>,
    actor: Actor,
    Path((product_id, site_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require(crate::auth::consts::SERVICE_ORDERS_READ)?;
    let level = state
        .services
        .inventory
        .get_level(product_id, site_id)
        .await?;
    Ok(success_response(level))
}

async fn set_stock_level(
    State(state): State<AppState>,
    actor: Actor,
    Path((product_id, site_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<StockQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let level = state
        .services
        .inventory
        .set_level(&actor, product_id, site_id, request.quantity)
        .await?;
    Ok(success_response(level))
}

async fn receive_stock(
    State(state): State<AppState>,
    actor: Actor,
    Path((product_id, site_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<StockQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let level = state
        .services
        .inventory
        .receive(&actor, product_id, site_id, request.quantity)
        .await?;
    Ok(success_response(level))
}
