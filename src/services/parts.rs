//! Binds consumed parts to an order and keeps stock in step with them.
//!
//! All functions run on the caller's connection; the caller owns the
//! transaction, so a failure anywhere leaves neither lines nor stock changed.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, ModelTrait, Set};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    commands::PartLineInput,
    entities::{part_line_item, service_order},
    errors::ServiceError,
    events::Event,
    models::{
        money::{line_subtotal_cents, non_negative_amount, to_cents},
        MovementReason, ServiceOrderStatus,
    },
    services::{
        inventory::{InventoryStore, MovementContext},
        order_records,
    },
};

/// Result of a reconcile: the new line set and the stock events it caused.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub lines: Vec<part_line_item::Model>,
    pub events: Vec<Event>,
}

pub struct PartsConsumptionManager;

impl PartsConsumptionManager {
    /// Checks quantity, price and subtotal range of every input and that
    /// line ids are unique.
    pub fn validate_inputs(inputs: &[PartLineInput]) -> Result<(), ServiceError> {
        let mut seen = HashSet::new();
        for input in inputs {
            if input.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for product {} must be greater than zero, got {}",
                    input.product_id, input.quantity
                )));
            }
            input.validate()?;
            let unit_price_cents = to_cents(non_negative_amount(input.unit_price, "Unit price")?)?;
            line_subtotal_cents(unit_price_cents, input.quantity)?;
            if let Some(id) = input.line_id {
                if !seen.insert(id) {
                    return Err(ServiceError::ValidationError(format!(
                        "Line {} appears more than once",
                        id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Deducts stock for one line and persists it. A caller-chosen line id
    /// that is already taken is a `Conflict`; nothing is deducted.
    pub async fn add_line<C: ConnectionTrait>(
        conn: &C,
        order: &service_order::Model,
        input: &PartLineInput,
        events: &mut Vec<Event>,
    ) -> Result<part_line_item::Model, ServiceError> {
        if !matches!(
            order.status,
            ServiceOrderStatus::Received
                | ServiceOrderStatus::Diagnosing
                | ServiceOrderStatus::InRepair
                | ServiceOrderStatus::InHomeVisit
                | ServiceOrderStatus::Repaired
        ) {
            return Err(ServiceError::AlreadyTerminal {
                order_id: order.id,
                status: order.status,
            });
        }
        Self::validate_inputs(std::slice::from_ref(input))?;

        let line_id = input.line_id.unwrap_or_else(Uuid::new_v4);
        if part_line_item::Entity::find_by_id(line_id)
            .one(conn)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Part line {} is already recorded",
                line_id
            )));
        }
        let unit_price_cents = to_cents(non_negative_amount(input.unit_price, "Unit price")?)?;
        let subtotal_cents = line_subtotal_cents(unit_price_cents, input.quantity)?;

        events.push(
            InventoryStore::deduct(
                conn,
                input.product_id,
                order.site_id,
                input.quantity,
                MovementContext::for_line(MovementReason::RepairConsumption, order.id, line_id),
            )
            .await?,
        );

        let line = part_line_item::ActiveModel {
            id: Set(line_id),
            service_order_id: Set(order.id),
            product_id: Set(input.product_id),
            quantity: Set(input.quantity),
            unit_price_cents: Set(unit_price_cents),
            subtotal_cents: Set(subtotal_cents),
            created_at: Set(Utc::now()),
            restored_at: Set(None),
        }
        .insert(conn)
        .await?;

        Ok(line)
    }

    /// Restores the line's quantity to stock, then deletes the line.
    /// Only while the order is REPAIRED.
    pub async fn remove_line<C: ConnectionTrait>(
        conn: &C,
        order: &service_order::Model,
        line_id: Uuid,
        events: &mut Vec<Event>,
    ) -> Result<(), ServiceError> {
        ensure_repaired(order)?;

        let line = part_line_item::Entity::find_by_id(line_id)
            .one(conn)
            .await?
            .filter(|line| line.service_order_id == order.id && line.restored_at.is_none())
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Part line {} not found on service order {}",
                    line_id, order.id
                ))
            })?;

        events.push(
            InventoryStore::restore(
                conn,
                line.product_id,
                order.site_id,
                line.quantity,
                MovementContext::for_line(MovementReason::RepairReturn, order.id, line.id),
            )
            .await?,
        );
        line.delete(conn).await?;
        Ok(())
    }

    /// Pre-checks the net demand of a batch of new lines, then adds them.
    pub async fn consume<C: ConnectionTrait>(
        conn: &C,
        order: &service_order::Model,
        inputs: &[PartLineInput],
        events: &mut Vec<Event>,
    ) -> Result<Vec<part_line_item::Model>, ServiceError> {
        Self::validate_inputs(inputs)?;

        let mut demand: BTreeMap<Uuid, i64> = BTreeMap::new();
        for input in inputs {
            *demand.entry(input.product_id).or_default() += i64::from(input.quantity);
        }
        InventoryStore::ensure_available(conn, order.site_id, &demand).await?;

        let mut lines = Vec::with_capacity(inputs.len());
        for input in inputs {
            lines.push(Self::add_line(conn, order, input, events).await?);
        }
        Ok(lines)
    }

    /// Brings the order's lines to exactly `desired`. Lines are matched by
    /// id; lines without an id are new. The net stock demand is checked
    /// before any write, so a shortfall rejects the whole reconcile.
    pub async fn reconcile<C: ConnectionTrait>(
        conn: &C,
        order: &service_order::Model,
        desired: &[PartLineInput],
    ) -> Result<ReconcileOutcome, ServiceError> {
        ensure_repaired(order)?;
        Self::validate_inputs(desired)?;

        let current = order_records::active_part_lines(conn, order.id).await?;
        let current_by_id: HashMap<Uuid, &part_line_item::Model> =
            current.iter().map(|line| (line.id, line)).collect();

        for input in desired {
            if let Some(line) = input.line_id.and_then(|id| current_by_id.get(&id)) {
                if line.product_id != input.product_id {
                    return Err(ServiceError::ValidationError(format!(
                        "Line {} cannot change product; remove it and add a new line",
                        line.id
                    )));
                }
            }
        }

        let mut net: BTreeMap<Uuid, i64> = BTreeMap::new();
        for line in &current {
            *net.entry(line.product_id).or_default() -= i64::from(line.quantity);
        }
        for input in desired {
            *net.entry(input.product_id).or_default() += i64::from(input.quantity);
        }
        InventoryStore::ensure_available(conn, order.site_id, &net).await?;

        let desired_ids: HashSet<Uuid> = desired.iter().filter_map(|i| i.line_id).collect();
        let mut outcome = ReconcileOutcome::default();

        // Restores first so that swaps within one product never dip below zero.
        for line in current.iter().filter(|l| !desired_ids.contains(&l.id)) {
            Self::remove_line(conn, order, line.id, &mut outcome.events).await?;
        }

        let mut increases = Vec::new();
        for input in desired {
            let existing = input.line_id.and_then(|id| current_by_id.get(&id).copied());
            match existing {
                Some(line) if input.quantity < line.quantity => {
                    outcome.events.push(
                        InventoryStore::restore(
                            conn,
                            line.product_id,
                            order.site_id,
                            line.quantity - input.quantity,
                            MovementContext::for_line(
                                MovementReason::RepairReturn,
                                order.id,
                                line.id,
                            ),
                        )
                        .await?,
                    );
                    outcome.lines.push(update_line(conn, line, input).await?);
                }
                Some(line) if input.quantity > line.quantity => {
                    increases.push(Increase::Existing(line, input))
                }
                Some(line) => outcome.lines.push(update_line(conn, line, input).await?),
                None => increases.push(Increase::New(input)),
            }
        }

        for increase in increases {
            match increase {
                Increase::New(input) => {
                    let added = Self::add_line(conn, order, input, &mut outcome.events).await?;
                    outcome.lines.push(added);
                }
                Increase::Existing(line, input) => {
                    outcome.events.push(
                        InventoryStore::deduct(
                            conn,
                            line.product_id,
                            order.site_id,
                            input.quantity - line.quantity,
                            MovementContext::for_line(
                                MovementReason::RepairConsumption,
                                order.id,
                                line.id,
                            ),
                        )
                        .await?,
                    );
                    outcome.lines.push(update_line(conn, line, input).await?);
                }
            }
        }

        info!(
            order_id = %order.id,
            lines = outcome.lines.len(),
            movements = outcome.events.len(),
            "parts reconciled"
        );
        Ok(outcome)
    }

    /// Returns every still-charged line to stock and marks it restored.
    pub async fn restore_all<C: ConnectionTrait>(
        conn: &C,
        order: &service_order::Model,
        events: &mut Vec<Event>,
    ) -> Result<i64, ServiceError> {
        let lines = order_records::active_part_lines(conn, order.id).await?;
        let mut restored = 0i64;
        for line in lines {
            events.push(
                InventoryStore::restore(
                    conn,
                    line.product_id,
                    order.site_id,
                    line.quantity,
                    MovementContext::for_line(
                        MovementReason::CancellationRestore,
                        order.id,
                        line.id,
                    ),
                )
                .await?,
            );
            restored += i64::from(line.quantity);
            let mut active: part_line_item::ActiveModel = line.into();
            active.restored_at = Set(Some(Utc::now()));
            active.update(conn).await?;
        }
        Ok(restored)
    }
}

enum Increase<'a> {
    Existing(&'a part_line_item::Model, &'a PartLineInput),
    New(&'a PartLineInput),
}

fn ensure_repaired(order: &service_order::Model) -> Result<(), ServiceError> {
    if order.status.is_terminal() {
        return Err(ServiceError::AlreadyTerminal {
            order_id: order.id,
            status: order.status,
        });
    }
    if order.status != ServiceOrderStatus::Repaired {
        return Err(ServiceError::InvalidTransition {
            from: order.status,
            to: ServiceOrderStatus::Repaired,
        });
    }
    Ok(())
}

async fn update_line<C: ConnectionTrait>(
    conn: &C,
    line: &part_line_item::Model,
    input: &PartLineInput,
) -> Result<part_line_item::Model, ServiceError> {
    let unit_price_cents = to_cents(non_negative_amount(input.unit_price, "Unit price")?)?;
    if line.quantity == input.quantity && line.unit_price_cents == unit_price_cents {
        return Ok(line.clone());
    }
    let mut active: part_line_item::ActiveModel = line.clone().into();
    active.quantity = Set(input.quantity);
    active.unit_price_cents = Set(unit_price_cents);
    active.subtotal_cents = Set(line_subtotal_cents(unit_price_cents, input.quantity)?);
    Ok(active.update(conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn input(line_id: Option<Uuid>, quantity: i32) -> PartLineInput {
        PartLineInput {
            line_id,
            product_id: Uuid::new_v4(),
            quantity,
            unit_price: dec!(10.00),
        }
    }

    #[test]
    fn rejects_non_positive_quantities() {
        assert!(PartsConsumptionManager::validate_inputs(&[input(None, 0)]).is_err());
        assert!(PartsConsumptionManager::validate_inputs(&[input(None, 1)]).is_ok());
    }

    #[test]
    fn rejects_duplicate_line_ids() {
        let id = Uuid::new_v4();
        let err =
            PartsConsumptionManager::validate_inputs(&[input(Some(id), 1), input(Some(id), 2)])
                .unwrap_err();
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn rejects_negative_prices() {
        let mut bad = input(None, 1);
        bad.unit_price = dec!(-0.01);
        assert!(matches!(
            PartsConsumptionManager::validate_inputs(&[bad]),
            Err(ServiceError::InvalidAmount(_))
        ));
    }

    #[test]
    fn rejects_quantities_above_the_line_limit() {
        assert!(matches!(
            PartsConsumptionManager::validate_inputs(&[input(None, i32::MAX)]),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn rejects_subtotals_outside_the_cent_range() {
        let mut pricey = input(None, 2);
        pricey.unit_price = dec!(90000000000000000);
        assert!(matches!(
            PartsConsumptionManager::validate_inputs(&[pricey]),
            Err(ServiceError::InvalidAmount(_))
        ));
    }
}
