pub mod common;
pub mod health;
pub mod inventory;
pub mod service_orders;

use axum::Router;
use std::sync::Arc;

use crate::config::ServiceOrderSettings;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cancellation::CancellationService,
    inventory::InventoryService,
    ledger::LedgerService,
    service_orders::{ReferenceDirectory, ServiceOrderService},
};

pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub service_orders: Arc<ServiceOrderService>,
    pub ledger: Arc<LedgerService>,
    pub cancellation: Arc<CancellationService>,
    pub inventory: Arc<InventoryService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        directory: Arc<dyn ReferenceDirectory>,
        settings: ServiceOrderSettings,
    ) -> Self {
        Self {
            service_orders: Arc::new(ServiceOrderService::new(
                db_pool.clone(),
                event_sender.clone(),
                directory,
                settings,
            )),
            ledger: Arc::new(LedgerService::new(db_pool.clone(), event_sender.clone())),
            cancellation: Arc::new(CancellationService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            inventory: Arc::new(InventoryService::new(db_pool, event_sender)),
        }
    }
}

/// Every versioned API route plus the probes at the root.
pub fn api_router(state: AppState) -> Router {
    let v1 = Router::new()
        .nest("/service-orders", service_orders::service_orders_router())
        .nest("/inventory", inventory::inventory_router());

    Router::new()
        .nest("/api/v1", v1)
        .merge(health::health_routes())
        .with_state(state)
}
