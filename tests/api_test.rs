mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

use common::{admin, clerk, technician, TestApp};

fn intake_body(site_id: Uuid) -> serde_json::Value {
    json!({
        "site_id": site_id,
        "client_id": Uuid::new_v4(),
        "service_kind": "WORKSHOP",
        "equipment": [{
            "equipment_type": "phone",
            "brand": "Pixel",
            "reported_problems": ["cracked screen"]
        }],
        "service_cost": "60.00",
        "advance": { "amount": "20.00", "method": "cash" }
    })
}

#[tokio::test]
async fn health_and_metrics_are_public() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");

    let (status, body) = app.request(Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, _) = app.request(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn requests_without_an_actor_are_refused() {
    let app = TestApp::new().await;
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/service-orders",
            None,
            Some(intake_body(app.site_id)),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn order_walks_through_the_http_api() {
    let app = TestApp::new().await;
    let product = Uuid::new_v4();
    app.stock(product, 2).await;

    let (status, created) = app
        .request(
            Method::POST,
            "/api/v1/service-orders",
            Some(&clerk()),
            Some(intake_body(app.site_id)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let id = created["order"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["order"]["status"], "RECEIVED");
    assert_eq!(created["ledger"]["balance"], "40.00");

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/start-repair"),
            Some(&technician()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/complete-repair"),
            Some(&technician()),
            Some(json!({
                "diagnosis": "Broken digitizer",
                "solution": "Replaced screen",
                "parts": [{ "product_id": product, "quantity": 3, "unit_price": "35.00" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "insufficient_stock");

    let (status, repaired) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/complete-repair"),
            Some(&technician()),
            Some(json!({
                "diagnosis": "Broken digitizer",
                "solution": "Replaced screen",
                "parts": [{ "product_id": product, "quantity": 1, "unit_price": "35.00" }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{repaired}");
    assert_eq!(repaired["ledger"]["total"], "95.00");
    assert_eq!(repaired["ledger"]["balance"], "75.00");

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/payments"),
            Some(&clerk()),
            Some(json!({ "amount": "80.00", "method": "card" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "balance_exceeded");

    let (status, delivered) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/deliver"),
            Some(&clerk()),
            Some(json!({
                "delivered_at": chrono::Utc::now().to_rfc3339(),
                "receiver": { "kind": "client" },
                "balance_paid_now": true,
                "payment_method": "card"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{delivered}");
    assert_eq!(delivered["order"]["status"], "DELIVERED");
    assert_eq!(delivered["ledger"]["balance"], "0.00");

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/cancel"),
            Some(&admin()),
            Some(json!({ "reason": "too late" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_terminal");

    let (status, receipt) = app
        .request(
            Method::GET,
            &format!("/api/v1/service-orders/{id}/receipt"),
            Some(&clerk()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["parts"].as_array().unwrap().len(), 1);
    assert_eq!(receipt["payments"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn only_admins_cancel_and_manage_stock() {
    let app = TestApp::new().await;
    let (_, created) = app
        .request(
            Method::POST,
            "/api/v1/service-orders",
            Some(&clerk()),
            Some(intake_body(app.site_id)),
        )
        .await;
    let id = created["order"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/cancel"),
            Some(&clerk()),
            Some(json!({ "reason": "client changed mind" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let product = Uuid::new_v4();
    let uri = format!("/api/v1/inventory/{}/sites/{}", product, app.site_id);
    let (status, _) = app
        .request(
            Method::PUT,
            &uri,
            Some(&technician()),
            Some(json!({ "quantity": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, level) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin()),
            Some(json!({ "quantity": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(level["available"], 5);

    let (status, cancelled) = app
        .request(
            Method::POST,
            &format!("/api/v1/service-orders/{id}/cancel"),
            Some(&admin()),
            Some(json!({ "reason": "client changed mind", "refund_amount": "20.00", "refund_method": "cash" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert_eq!(cancelled["order"]["status"], "CANCELLED");
}

#[tokio::test]
async fn listing_filters_by_status() {
    let app = TestApp::new().await;
    for _ in 0..3 {
        app.request(
            Method::POST,
            "/api/v1/service-orders",
            Some(&clerk()),
            Some(intake_body(app.site_id)),
        )
        .await;
    }

    let (status, page) = app
        .request(
            Method::GET,
            &format!(
                "/api/v1/service-orders?site_id={}&status=RECEIVED&per_page=2",
                app.site_id
            ),
            Some(&clerk()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["total_pages"], 2);

    let (_, delivered) = app
        .request(
            Method::GET,
            "/api/v1/service-orders?status=DELIVERED",
            Some(&clerk()),
            None,
        )
        .await;
    assert_eq!(delivered["pagination"]["total"], 0);
}
