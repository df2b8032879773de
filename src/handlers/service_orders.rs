use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::Actor,
    commands::{
        AdvancePayment, AttachPhotosCommand, CancelServiceOrderCommand, CompleteRepairCommand,
        CreateServiceOrderCommand, DeliverCommand, EditRepairCommand, RecordPaymentCommand,
        UpdateDetailsCommand,
    },
    errors::ServiceError,
    handlers::common::{
        created_response, success_response, PaginatedResponse, VersionGuard,
    },
    models::ServiceOrderStatus,
    services::service_orders::ServiceOrderFilter,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ServiceOrderListQuery {
    pub site_id: Option<Uuid>,
    pub status: Option<ServiceOrderStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct SiteQuery {
    pub site_id: Uuid,
}

/// Create the service orders router
pub fn service_orders_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_service_orders).post(create_service_order))
        .route("/pending-settlements", get(list_pending_settlements))
        .route(
            "/:id",
            get(get_service_order).patch(update_service_order_details),
        )
        .route("/:id/receipt", get(get_receipt))
        .route("/:id/ledger", get(get_ledger))
        .route("/:id/movements", get(get_movements))
        .route("/:id/diagnosis", post(start_diagnosis))
        .route("/:id/start-repair", post(start_repair))
        .route("/:id/home-visit", post(start_home_visit))
        .route("/:id/complete-repair", post(complete_repair))
        .route("/:id/repair", post(edit_repair))
        .route("/:id/parts/:line_id", delete(remove_part_line))
        .route("/:id/deliver", post(deliver))
        .route("/:id/cancel", post(cancel))
        .route("/:id/payments", post(record_payment))
        .route("/:id/advance", post(apply_advance))
        .route("/:id/photos", post(attach_photos))
}

async fn create_service_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(command): Json<CreateServiceOrderCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.service_orders.create(&actor, command).await?;
    Ok(created_response(details))
}

async fn list_service_orders(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ServiceOrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = ServiceOrderFilter {
        site_id: query.site_id,
        status: query.status,
    };
    let page = state
        .services
        .service_orders
        .list(&actor, filter, query.page, query.per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(
        page.items,
        page.page,
        page.per_page,
        page.total,
        page.total_pages,
    )))
}

async fn list_pending_settlements(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<SiteQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .service_orders
        .list_pending_settlements(&actor, query.site_id)
        .await?;
    Ok(success_response(orders))
}

async fn get_service_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state.services.service_orders.get(&actor, id).await?;
    Ok(success_response(details))
}

async fn update_service_order_details(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(command): Json<UpdateDetailsCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .service_orders
        .update_details(&actor, id, command)
        .await?;
    Ok(success_response(details))
}

async fn get_receipt(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let receipt = state.services.service_orders.receipt(&actor, id).await?;
    Ok(success_response(receipt))
}

async fn get_ledger(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require(crate::auth::consts::SERVICE_ORDERS_READ)?;
    let ledger = state.services.ledger.ledger_for(id).await?;
    Ok(success_response(ledger))
}

async fn get_movements(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let movements = state.services.service_orders.movements(&actor, id).await?;
    Ok(success_response(movements))
}

async fn start_diagnosis(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Option<Json<VersionGuard>>,
) -> Result<impl IntoResponse, ServiceError> {
    let guard = body.map(|Json(g)| g).unwrap_or_default();
    let order = state
        .services
        .service_orders
        .start_diagnosis(&actor, id, guard.expected_version)
        .await?;
    Ok(success_response(order))
}

async fn start_repair(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Option<Json<VersionGuard>>,
) -> Result<impl IntoResponse, ServiceError> {
    let guard = body.map(|Json(g)| g).unwrap_or_default();
    let order = state
        .services
        .service_orders
        .start_repair(&actor, id, guard.expected_version)
        .await?;
    Ok(success_response(order))
}

async fn start_home_visit(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Option<Json<VersionGuard>>,
) -> Result<impl IntoResponse, ServiceError> {
    let guard = body.map(|Json(g)| g).unwrap_or_default();
    let order = state
        .services
        .service_orders
        .start_home_visit(&actor, id, guard.expected_version)
        .await?;
    Ok(success_response(order))
}

async fn complete_repair(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(command): Json<CompleteRepairCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .service_orders
        .complete_repair(&actor, id, command)
        .await?;
    Ok(success_response(details))
}

async fn edit_repair(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(command): Json<EditRepairCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .service_orders
        .edit_repair(&actor, id, command)
        .await?;
    Ok(success_response(details))
}

async fn remove_part_line(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, line_id)): Path<(Uuid, Uuid)>,
    Query(guard): Query<VersionGuard>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .service_orders
        .remove_part_line(&actor, id, line_id, guard.expected_version)
        .await?;
    Ok(success_response(details))
}

async fn deliver(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(command): Json<DeliverCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .service_orders
        .deliver(&actor, id, command)
        .await?;
    Ok(success_response(details))
}

async fn cancel(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(command): Json<CancelServiceOrderCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = state
        .services
        .cancellation
        .cancel(&actor, id, command)
        .await?;
    Ok(success_response(details))
}

async fn record_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(command): Json<RecordPaymentCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let receipt = state
        .services
        .ledger
        .record_payment(&actor, id, command)
        .await?;
    // A replayed key answers 200 with the original payment.
    if receipt.created {
        Ok(created_response(receipt))
    } else {
        Ok(success_response(receipt))
    }
}

async fn apply_advance(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(advance): Json<AdvancePayment>,
) -> Result<impl IntoResponse, ServiceError> {
    let receipt = state
        .services
        .ledger
        .apply_advance(&actor, id, advance)
        .await?;
    Ok(created_response(receipt))
}

async fn attach_photos(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(command): Json<AttachPhotosCommand>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .service_orders
        .attach_photos(&actor, id, command)
        .await?;
    Ok(success_response(order))
}
