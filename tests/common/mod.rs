#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use stateset_repair::{
    auth::{Actor, ActorRole},
    commands::{CreateServiceOrderCommand, PartLineInput},
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::{
        self,
        common::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER},
    },
    models::{EquipmentDescriptor, Priority, ReceivedCondition, ServiceKind},
    services::service_orders::AcceptAllDirectory,
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Application state backed by a private in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub site_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            vec![Arc::new(events::LoggingEventHandler)],
        ));

        let state = AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            Arc::new(AcceptAllDirectory),
        );

        Self {
            state,
            site_id: Uuid::new_v4(),
            _event_task: event_task,
        }
    }

    pub fn router(&self) -> Router {
        handlers::api_router(self.state.clone())
    }

    /// Sends one request through the full router and decodes the JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        actor: Option<&Actor>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder
                .header(ACTOR_ID_HEADER, actor.id.to_string())
                .header(ACTOR_ROLE_HEADER, actor.role.to_string());
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    /// Sets the stock of a product at the test site.
    pub async fn stock(&self, product_id: Uuid, quantity: i32) {
        self.state
            .services
            .inventory
            .set_level(&admin(), product_id, self.site_id, quantity)
            .await
            .expect("seed stock");
    }

    pub async fn available(&self, product_id: Uuid) -> i32 {
        self.state
            .services
            .inventory
            .get_level(product_id, self.site_id)
            .await
            .expect("read stock")
            .available
    }

    pub fn intake(&self, service_cost: Decimal) -> CreateServiceOrderCommand {
        CreateServiceOrderCommand {
            site_id: self.site_id,
            client_id: Uuid::new_v4(),
            technician_id: None,
            service_kind: ServiceKind::Workshop,
            priority: Priority::Normal,
            equipment: vec![laptop()],
            service_cost,
            addons: vec![],
            estimated_delivery_at: None,
            warranty_days: None,
            advance: None,
            idempotency_key: None,
        }
    }
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), ActorRole::Admin)
}

pub fn technician() -> Actor {
    Actor::new(Uuid::new_v4(), ActorRole::Technician)
}

pub fn clerk() -> Actor {
    Actor::new(Uuid::new_v4(), ActorRole::Clerk)
}

pub fn laptop() -> EquipmentDescriptor {
    EquipmentDescriptor {
        equipment_type: "laptop".to_string(),
        brand: Some("Lenovo".to_string()),
        model: Some("T14".to_string()),
        serial_number: Some("PF-2K9XL".to_string()),
        description: None,
        condition: ReceivedCondition {
            missing_charger: true,
            ..Default::default()
        },
        reported_problems: vec!["does not boot".to_string()],
        problem_notes: None,
    }
}

pub fn part(product_id: Uuid, quantity: i32, unit_price: Decimal) -> PartLineInput {
    PartLineInput {
        line_id: None,
        product_id,
        quantity,
        unit_price,
    }
}
