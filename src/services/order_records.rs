//! Row-level helpers shared by the order services. Every function takes the
//! connection it runs on so that it joins the caller's transaction.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::{
    entities::{part_line_item, payment, point_of_sale_item, service_order},
    errors::ServiceError,
    models::money::from_cents,
    services::ledger::Ledger,
};

pub(crate) async fn load_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<service_order::Model, ServiceError> {
    service_order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Service order {} not found", order_id)))
}

/// Part lines still charged to the order, oldest first.
pub(crate) async fn active_part_lines<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<part_line_item::Model>, ServiceError> {
    Ok(part_line_item::Entity::find()
        .filter(part_line_item::Column::ServiceOrderId.eq(order_id))
        .filter(part_line_item::Column::RestoredAt.is_null())
        .order_by_asc(part_line_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub(crate) async fn all_part_lines<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<part_line_item::Model>, ServiceError> {
    Ok(part_line_item::Entity::find()
        .filter(part_line_item::Column::ServiceOrderId.eq(order_id))
        .order_by_asc(part_line_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub(crate) async fn sale_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<point_of_sale_item::Model>, ServiceError> {
    Ok(point_of_sale_item::Entity::find()
        .filter(point_of_sale_item::Column::ServiceOrderId.eq(order_id))
        .order_by_asc(point_of_sale_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub(crate) async fn payments<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<payment::Model>, ServiceError> {
    Ok(payment::Entity::find()
        .filter(payment::Column::ServiceOrderId.eq(order_id))
        .order_by_asc(payment::Column::RecordedAt)
        .all(conn)
        .await?)
}

/// Recomputes the ledger from rows, using the order's stored service cost
/// and addons.
pub(crate) async fn derive_ledger<C: ConnectionTrait>(
    conn: &C,
    order: &service_order::Model,
) -> Result<Ledger, ServiceError> {
    let parts = active_part_lines(conn, order.id).await?;
    let sales = sale_items(conn, order.id).await?;
    let payments = payments(conn, order.id).await?;
    Ok(Ledger::derive(
        from_cents(order.service_cost_cents),
        &order.addons,
        &parts,
        &sales,
        &payments,
    ))
}

/// Writes `active` only if the row still carries `expected_version`, then
/// returns the fresh row. A lost race surfaces as `Conflict`.
pub(crate) async fn save_guarded<C: ConnectionTrait>(
    conn: &C,
    mut active: service_order::ActiveModel,
    order_id: Uuid,
    expected_version: i32,
) -> Result<service_order::Model, ServiceError> {
    active.version = Set(expected_version + 1);
    active.updated_at = Set(Utc::now());

    let result = service_order::Entity::update_many()
        .set(active)
        .filter(service_order::Column::Id.eq(order_id))
        .filter(service_order::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "Service order {} was modified concurrently; reload and retry",
            order_id
        )));
    }

    load_order(conn, order_id).await
}

/// Rejects a caller that acted on a stale copy of the order.
pub(crate) fn check_expected_version(
    order: &service_order::Model,
    expected: Option<i32>,
) -> Result<(), ServiceError> {
    match expected {
        Some(v) if v != order.version => Err(ServiceError::Conflict(format!(
            "Service order {} is at version {}, request expected {}",
            order.id, order.version, v
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use sea_orm::{DatabaseConnection, TransactionTrait};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        auth::Actor,
        commands::CreateServiceOrderCommand,
        config::ServiceOrderSettings,
        db::{establish_connection_with_config, run_migrations, DbConfig},
        events::{Event, EventSender},
        models::{EquipmentDescriptor, MovementReason, Priority, ServiceKind},
        services::{
            inventory::{InventoryStore, MovementContext},
            service_orders::{AcceptAllDirectory, ServiceOrderService},
        },
    };

    async fn seeded_order() -> (Arc<DatabaseConnection>, service_order::Model, mpsc::Receiver<Event>) {
        let db = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .expect("in-memory sqlite connects");
        run_migrations(&db).await.expect("migrations apply");
        let db = Arc::new(db);

        let (tx, rx) = mpsc::channel(64);
        let svc = ServiceOrderService::new(
            db.clone(),
            EventSender::new(tx),
            Arc::new(AcceptAllDirectory),
            ServiceOrderSettings::default(),
        );
        let created = svc
            .create(
                &Actor::admin(Uuid::new_v4()),
                CreateServiceOrderCommand {
                    site_id: Uuid::new_v4(),
                    client_id: Uuid::new_v4(),
                    technician_id: None,
                    service_kind: ServiceKind::Workshop,
                    priority: Priority::Normal,
                    equipment: vec![EquipmentDescriptor {
                        equipment_type: "printer".to_string(),
                        brand: None,
                        model: None,
                        serial_number: None,
                        description: None,
                        condition: Default::default(),
                        reported_problems: vec!["paper jam".to_string()],
                        problem_notes: None,
                    }],
                    service_cost: dec!(35.00),
                    addons: vec![],
                    estimated_delivery_at: None,
                    warranty_days: None,
                    advance: None,
                    idempotency_key: None,
                },
            )
            .await
            .expect("intake succeeds");
        (db, created.order, rx)
    }

    #[tokio::test]
    async fn writes_on_a_stale_version_conflict_and_roll_back() {
        let (db, stale, _rx) = seeded_order().await;
        let product = Uuid::new_v4();
        InventoryStore::set_level(&*db, product, stale.site_id, 5)
            .await
            .unwrap();

        // Another writer lands first and moves the version on.
        let mut active: service_order::ActiveModel = stale.clone().into();
        active.diagnosis = Set(Some("Feed roller worn".to_string()));
        let fresh = save_guarded(&*db, active, stale.id, stale.version)
            .await
            .unwrap();
        assert_eq!(fresh.version, stale.version + 1);

        let txn = db.begin().await.unwrap();
        InventoryStore::deduct(
            &txn,
            product,
            stale.site_id,
            2,
            MovementContext::for_line(MovementReason::RepairConsumption, stale.id, Uuid::new_v4()),
        )
        .await
        .unwrap();
        let mut active: service_order::ActiveModel = stale.clone().into();
        active.solution = Set(Some("Replaced roller".to_string()));
        let err = save_guarded(&txn, active, stale.id, stale.version)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        txn.rollback().await.unwrap();

        assert_eq!(
            InventoryStore::get_available(&*db, product, stale.site_id)
                .await
                .unwrap(),
            5
        );
        let current = load_order(&*db, stale.id).await.unwrap();
        assert_eq!(current.version, fresh.version);
        assert_eq!(current.solution, None);
        assert!(check_expected_version(&current, Some(current.version)).is_ok());
        assert!(matches!(
            check_expected_version(&current, Some(stale.version)),
            Err(ServiceError::Conflict(_))
        ));
    }
}
