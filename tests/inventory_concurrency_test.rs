mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::TransactionTrait;
use stateset_repair::{
    errors::ServiceError,
    models::MovementReason,
    services::inventory::{InventoryStore, MovementContext},
};
use uuid::Uuid;

use common::{admin, clerk, part, technician, TestApp};

#[tokio::test]
async fn concurrent_deductions_never_oversell() {
    let app = TestApp::new().await;
    let product = Uuid::new_v4();
    app.stock(product, 10).await;

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let db = app.state.db.clone();
        let site_id = app.site_id;
        tasks.push(tokio::spawn(async move {
            let txn = db.begin().await?;
            InventoryStore::deduct(
                &txn,
                product,
                site_id,
                1,
                MovementContext::manual(MovementReason::Adjustment),
            )
            .await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(())
        }));
    }

    let mut success = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => success += 1,
            Err(e) => assert_matches!(e, ServiceError::InsufficientStock { available: 0, .. }),
        }
    }
    assert_eq!(success, 10, "exactly 10 deductions should succeed");
    assert_eq!(app.available(product).await, 0);
}

#[tokio::test]
async fn missing_stock_rows_count_as_empty() {
    let app = TestApp::new().await;
    let product = Uuid::new_v4();
    assert_eq!(app.available(product).await, 0);

    let txn = app.state.db.begin().await.unwrap();
    let err = InventoryStore::deduct(
        &txn,
        product,
        app.site_id,
        1,
        MovementContext::manual(MovementReason::Adjustment),
    )
    .await
    .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock {
            requested: 1,
            available: 0,
            ..
        }
    );
}

#[tokio::test]
async fn stock_returns_to_its_start_after_repair_and_cancel() {
    let app = TestApp::new().await;
    let svc = &app.state.services.service_orders;
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    app.stock(a, 7).await;
    app.stock(b, 3).await;

    let order_id = svc
        .create(&clerk(), app.intake(dec!(10.00)))
        .await
        .unwrap()
        .order
        .id;
    svc.complete_repair(
        &technician(),
        order_id,
        stateset_repair::commands::CompleteRepairCommand {
            diagnosis: "Worn hinge".to_string(),
            solution: "Replaced hinge and bezel".to_string(),
            parts: vec![part(a, 2, dec!(4.00)), part(b, 3, dec!(6.00))],
            idempotency_key: None,
            expected_version: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(app.available(a).await, 5);
    assert_eq!(app.available(b).await, 0);

    app.state
        .services
        .cancellation
        .cancel(
            &admin(),
            order_id,
            stateset_repair::commands::CancelServiceOrderCommand {
                reason: "Parts on backorder".to_string(),
                notes: Some("client will return next month".to_string()),
                refund_amount: dec!(0),
                refund_method: None,
                expected_version: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(app.available(a).await, 7);
    assert_eq!(app.available(b).await, 3);
}

#[tokio::test]
async fn receiving_stock_requires_inventory_permission() {
    let app = TestApp::new().await;
    let product = Uuid::new_v4();
    let inventory = &app.state.services.inventory;

    assert_matches!(
        inventory
            .receive(&clerk(), product, app.site_id, 4)
            .await,
        Err(ServiceError::Unauthorized(_))
    );
    let level = inventory
        .receive(&admin(), product, app.site_id, 4)
        .await
        .unwrap();
    assert_eq!(level.available, 4);
    assert_matches!(
        inventory.set_level(&admin(), product, app.site_id, -1).await,
        Err(ServiceError::ValidationError(_))
    );
}
