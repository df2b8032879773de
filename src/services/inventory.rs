//! Per-site stock levels and their audit trail.
//!
//! [`InventoryStore`] works on any connection so that callers can run it
//! inside the transaction of the order mutation that triggered it.
//! [`InventoryService`] is the standalone facade used for administration.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{consts, Actor},
    entities::{inventory_movement, inventory_stock},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::STOCK_MOVEMENTS,
    models::MovementReason,
};

/// What caused a stock movement, recorded on its audit row.
#[derive(Debug, Clone, Copy)]
pub struct MovementContext {
    pub reason: MovementReason,
    pub service_order_id: Option<Uuid>,
    pub line_id: Option<Uuid>,
}

impl MovementContext {
    pub fn for_line(reason: MovementReason, service_order_id: Uuid, line_id: Uuid) -> Self {
        Self {
            reason,
            service_order_id: Some(service_order_id),
            line_id: Some(line_id),
        }
    }

    pub fn manual(reason: MovementReason) -> Self {
        Self {
            reason,
            service_order_id: None,
            line_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub site_id: Uuid,
    pub available: i32,
}

pub struct InventoryStore;

impl InventoryStore {
    /// Available quantity, zero when the product was never stocked at the site.
    pub async fn get_available<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        site_id: Uuid,
    ) -> Result<i32, ServiceError> {
        let row = inventory_stock::Entity::find_by_id((product_id, site_id))
            .one(conn)
            .await?;
        Ok(row.map(|r| r.available).unwrap_or(0))
    }

    /// Checks a whole demand set before anything is written.
    pub async fn ensure_available<C: ConnectionTrait>(
        conn: &C,
        site_id: Uuid,
        demand: &BTreeMap<Uuid, i64>,
    ) -> Result<(), ServiceError> {
        for (&product_id, &requested) in demand {
            if requested <= 0 {
                continue;
            }
            let available = Self::get_available(conn, product_id, site_id).await?;
            if i64::from(available) < requested {
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Conditional decrement: the row only changes when enough stock is
    /// available, so concurrent deductions can never drive it negative.
    pub async fn deduct<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
        ctx: MovementContext,
    ) -> Result<Event, ServiceError> {
        ensure_positive_quantity(quantity)?;

        let result = inventory_stock::Entity::update_many()
            .col_expr(
                inventory_stock::Column::Available,
                Expr::col(inventory_stock::Column::Available).sub(quantity),
            )
            .col_expr(inventory_stock::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_stock::Column::ProductId.eq(product_id))
            .filter(inventory_stock::Column::SiteId.eq(site_id))
            .filter(inventory_stock::Column::Available.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let available = Self::get_available(conn, product_id, site_id).await?;
            warn!(%product_id, %site_id, requested = quantity, available, "insufficient stock");
            return Err(ServiceError::InsufficientStock {
                product_id,
                requested: i64::from(quantity),
                available,
            });
        }

        record_movement(conn, product_id, site_id, -quantity, ctx).await?;

        Ok(Event::StockDeducted {
            product_id,
            site_id,
            quantity,
            reason: ctx.reason,
            service_order_id: ctx.service_order_id,
        })
    }

    /// Returns quantity to stock, creating the row if the site never held it.
    pub async fn restore<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
        ctx: MovementContext,
    ) -> Result<Event, ServiceError> {
        ensure_positive_quantity(quantity)?;
        increment(conn, product_id, site_id, quantity).await?;
        record_movement(conn, product_id, site_id, quantity, ctx).await?;

        Ok(Event::StockRestored {
            product_id,
            site_id,
            quantity,
            reason: ctx.reason,
            service_order_id: ctx.service_order_id,
        })
    }

    /// Overwrites the level, writing the difference as an adjustment.
    pub async fn set_level<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
    ) -> Result<StockLevel, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "Stock level cannot be negative, got {}",
                quantity
            )));
        }

        let existing = inventory_stock::Entity::find_by_id((product_id, site_id))
            .one(conn)
            .await?;
        let previous = existing.as_ref().map(|r| r.available).unwrap_or(0);

        match existing {
            Some(row) => {
                let mut active: inventory_stock::ActiveModel = row.into();
                active.available = Set(quantity);
                active.updated_at = Set(Utc::now());
                active.update(conn).await?;
            }
            None => {
                inventory_stock::ActiveModel {
                    product_id: Set(product_id),
                    site_id: Set(site_id),
                    available: Set(quantity),
                    updated_at: Set(Utc::now()),
                }
                .insert(conn)
                .await?;
            }
        }

        let delta = quantity - previous;
        if delta != 0 {
            record_movement(
                conn,
                product_id,
                site_id,
                delta,
                MovementContext::manual(MovementReason::Adjustment),
            )
            .await?;
        }

        Ok(StockLevel {
            product_id,
            site_id,
            available: quantity,
        })
    }

    /// Adds incoming goods to the level.
    pub async fn receive<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
    ) -> Result<StockLevel, ServiceError> {
        ensure_positive_quantity(quantity)?;
        increment(conn, product_id, site_id, quantity).await?;
        record_movement(
            conn,
            product_id,
            site_id,
            quantity,
            MovementContext::manual(MovementReason::Receipt),
        )
        .await?;

        Ok(StockLevel {
            product_id,
            site_id,
            available: Self::get_available(conn, product_id, site_id).await?,
        })
    }

    /// Audit rows for one service order, oldest first.
    pub async fn movements_for_order<C: ConnectionTrait>(
        conn: &C,
        service_order_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        use sea_orm::QueryOrder;

        Ok(inventory_movement::Entity::find()
            .filter(inventory_movement::Column::ServiceOrderId.eq(service_order_id))
            .order_by_asc(inventory_movement::Column::CreatedAt)
            .all(conn)
            .await?)
    }
}

fn ensure_positive_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity must be greater than zero, got {}",
            quantity
        )));
    }
    Ok(())
}

async fn increment<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    site_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = inventory_stock::Entity::update_many()
        .col_expr(
            inventory_stock::Column::Available,
            Expr::col(inventory_stock::Column::Available).add(quantity),
        )
        .col_expr(inventory_stock::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_stock::Column::ProductId.eq(product_id))
        .filter(inventory_stock::Column::SiteId.eq(site_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        inventory_stock::ActiveModel {
            product_id: Set(product_id),
            site_id: Set(site_id),
            available: Set(quantity),
            updated_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

async fn record_movement<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    site_id: Uuid,
    delta: i32,
    ctx: MovementContext,
) -> Result<(), ServiceError> {
    inventory_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        site_id: Set(site_id),
        delta: Set(delta),
        reason: Set(ctx.reason),
        service_order_id: Set(ctx.service_order_id),
        line_id: Set(ctx.line_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    STOCK_MOVEMENTS
        .with_label_values(&[&ctx.reason.to_string()])
        .inc();
    Ok(())
}

/// Service for administering stock levels
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_level(
        &self,
        product_id: Uuid,
        site_id: Uuid,
    ) -> Result<StockLevel, ServiceError> {
        let available = InventoryStore::get_available(&*self.db_pool, product_id, site_id).await?;
        Ok(StockLevel {
            product_id,
            site_id,
            available,
        })
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn set_level(
        &self,
        actor: &Actor,
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
    ) -> Result<StockLevel, ServiceError> {
        actor.require(consts::INVENTORY_MANAGE)?;

        let txn = self.db_pool.begin().await?;
        let level = InventoryStore::set_level(&txn, product_id, site_id, quantity).await?;
        txn.commit().await?;

        info!(%product_id, %site_id, available = level.available, "stock level set");
        Ok(level)
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn receive(
        &self,
        actor: &Actor,
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
    ) -> Result<StockLevel, ServiceError> {
        actor.require(consts::INVENTORY_MANAGE)?;

        let txn = self.db_pool.begin().await?;
        let level = InventoryStore::receive(&txn, product_id, site_id, quantity).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::StockRestored {
            product_id,
            site_id,
            quantity,
            reason: MovementReason::Receipt,
            service_order_id: None,
        });
        info!(%product_id, %site_id, available = level.available, "stock received");
        Ok(level)
    }
}
