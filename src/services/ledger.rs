//! Money side of a service order.
//!
//! [`Ledger`] is a pure value derived from the order's rows; the cached
//! `*_cents` columns on `service_orders` are only a copy of it. Every
//! mutation recomputes the ledger from rows and writes the cache back.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts, Actor},
    commands::{AdvancePayment, RecordPaymentCommand},
    entities::{part_line_item, payment, point_of_sale_item, service_order},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{track, PAYMENTS_RECORDED},
    models::{
        money::{from_cents, positive_amount, round_money, to_cents},
        AddonList, PaymentKind, ServiceOrderStatus,
    },
    services::order_records,
};

/// Derived financial view of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub service_cost: Decimal,
    pub parts_cost: Decimal,
    pub addons_cost: Decimal,
    pub total: Decimal,
    pub advance: Decimal,
    pub payments: Decimal,
    pub refunds: Decimal,
    /// advance + payments - refunds
    pub paid: Decimal,
    pub balance: Decimal,
    /// Counter sales settled at delivery, outside the repair total.
    pub sales_total: Decimal,
    pub sales_collected: Decimal,
}

impl Ledger {
    pub fn compute_total(service_cost: Decimal, parts_cost: Decimal, addons: &[Decimal]) -> Decimal {
        let addons_cost: Decimal = addons.iter().copied().sum();
        round_money(service_cost + parts_cost + addons_cost)
    }

    /// Builds the ledger from its source rows. Restored part lines no longer
    /// count towards the parts cost.
    pub fn derive(
        service_cost: Decimal,
        addons: &AddonList,
        parts: &[part_line_item::Model],
        sales: &[point_of_sale_item::Model],
        payments: &[payment::Model],
    ) -> Self {
        let parts_cost = from_cents(
            parts
                .iter()
                .filter(|line| line.restored_at.is_none())
                .map(|line| line.subtotal_cents)
                .sum(),
        );
        let addon_prices = addons.prices();
        let addons_cost = round_money(addon_prices.iter().copied().sum());
        let total = Self::compute_total(service_cost, parts_cost, &addon_prices);

        let sum_kind = |kind: PaymentKind| {
            from_cents(
                payments
                    .iter()
                    .filter(|p| p.kind == kind)
                    .map(|p| p.amount_cents)
                    .sum(),
            )
        };
        let advance = sum_kind(PaymentKind::Advance);
        let paid_in = sum_kind(PaymentKind::Payment);
        let refunds = sum_kind(PaymentKind::Refund);
        let paid = advance + paid_in - refunds;

        let sales_total = from_cents(sales.iter().map(|s| s.subtotal_cents).sum());

        Self {
            service_cost: round_money(service_cost),
            parts_cost,
            addons_cost,
            total,
            advance,
            payments: paid_in,
            refunds,
            paid,
            balance: total - paid,
            sales_total,
            sales_collected: sales_total,
        }
    }

    /// Reads the cached columns. Advance and refund breakdowns are not
    /// cached and come back as zero.
    pub fn cached(order: &service_order::Model) -> Self {
        let sales_total = from_cents(order.sales_total_cents);
        Self {
            service_cost: from_cents(order.service_cost_cents),
            parts_cost: from_cents(order.parts_cost_cents),
            addons_cost: from_cents(order.addons_cost_cents),
            total: from_cents(order.total_cents),
            advance: Decimal::ZERO,
            payments: Decimal::ZERO,
            refunds: Decimal::ZERO,
            paid: from_cents(order.paid_cents),
            balance: from_cents(order.balance_cents),
            sales_total,
            sales_collected: sales_total,
        }
    }

    /// A payment must be positive and may not exceed the balance.
    pub fn check_payment(&self, amount: Decimal) -> Result<Decimal, ServiceError> {
        let amount = positive_amount(amount, "Payment amount")?;
        if amount > self.balance {
            return Err(ServiceError::BalanceExceeded {
                attempted: amount,
                available: self.balance.max(Decimal::ZERO),
            });
        }
        Ok(amount)
    }

    /// Only money actually collected can be handed back.
    pub fn check_refund(&self, amount: Decimal) -> Result<Decimal, ServiceError> {
        let amount = positive_amount(amount, "Refund amount")?;
        if amount > self.paid {
            return Err(ServiceError::BalanceExceeded {
                attempted: amount,
                available: self.paid.max(Decimal::ZERO),
            });
        }
        Ok(amount)
    }

    /// Rejects cost edits that would leave more collected than owed.
    pub fn check_total_covers_paid(&self) -> Result<(), ServiceError> {
        if self.balance < Decimal::ZERO {
            return Err(ServiceError::BalanceExceeded {
                attempted: self.paid,
                available: self.total,
            });
        }
        Ok(())
    }

    pub fn grand_total(&self) -> Decimal {
        self.total + self.sales_total
    }

    pub fn grand_paid(&self) -> Decimal {
        self.paid + self.sales_collected
    }

    /// Copies the ledger into the cached columns of an order update.
    pub fn write_cache(&self, active: &mut service_order::ActiveModel) -> Result<(), ServiceError> {
        active.service_cost_cents = Set(to_cents(self.service_cost)?);
        active.parts_cost_cents = Set(to_cents(self.parts_cost)?);
        active.addons_cost_cents = Set(to_cents(self.addons_cost)?);
        active.total_cents = Set(to_cents(self.total)?);
        active.paid_cents = Set(to_cents(self.paid)?);
        active.balance_cents = Set(to_cents(self.balance)?);
        active.sales_total_cents = Set(to_cents(self.sales_total)?);
        Ok(())
    }
}

/// Appends a ledger row. Callers have already validated the amount.
pub(crate) async fn append_payment<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    kind: PaymentKind,
    amount: Decimal,
    method: &str,
    idempotency_key: Option<String>,
    recorded_by: Uuid,
) -> Result<payment::Model, ServiceError> {
    let model = payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        service_order_id: Set(order_id),
        kind: Set(kind),
        amount_cents: Set(to_cents(amount)?),
        method: Set(method.to_string()),
        idempotency_key: Set(idempotency_key),
        recorded_by: Set(recorded_by),
        recorded_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;

    PAYMENTS_RECORDED
        .with_label_values(&[&kind.to_string()])
        .inc();
    Ok(model)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: payment::Model,
    pub ledger: Ledger,
    /// False when an earlier payment with the same idempotency key was returned.
    pub created: bool,
}

/// Payment recording against existing orders.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl LedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn ledger_for(&self, order_id: Uuid) -> Result<Ledger, ServiceError> {
        let order = order_records::load_order(&*self.db, order_id).await?;
        order_records::derive_ledger(&*self.db, &order).await
    }

    /// Records a partial or final payment. Accepted on any non-terminal order,
    /// and on a delivered order that was handed over with money owed.
    #[instrument(skip(self, actor, command), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn record_payment(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: RecordPaymentCommand,
    ) -> Result<PaymentReceipt, ServiceError> {
        track(
            "record_payment",
            self.record_payment_inner(actor, order_id, command).await,
        )
    }

    async fn record_payment_inner(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: RecordPaymentCommand,
    ) -> Result<PaymentReceipt, ServiceError> {
        actor.require(consts::PAYMENTS_CREATE)?;
        command.validate()?;

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;

        if let Some(key) = &command.idempotency_key {
            let existing = payment::Entity::find()
                .filter(payment::Column::ServiceOrderId.eq(order_id))
                .filter(payment::Column::IdempotencyKey.eq(key.clone()))
                .one(&txn)
                .await?;
            if let Some(existing) = existing {
                let ledger = order_records::derive_ledger(&txn, &order).await?;
                info!(payment_id = %existing.id, "payment replayed by idempotency key");
                return Ok(PaymentReceipt {
                    payment: existing,
                    ledger,
                    created: false,
                });
            }
        }

        let settling = order.status == ServiceOrderStatus::Delivered && order.pending_settlement;
        if order.status.is_terminal() && !settling {
            return Err(ServiceError::AlreadyTerminal {
                order_id,
                status: order.status,
            });
        }

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let amount = ledger.check_payment(command.amount)?;

        let payment = append_payment(
            &txn,
            order_id,
            PaymentKind::Payment,
            amount,
            &command.method,
            command.idempotency_key.clone(),
            actor.id,
        )
        .await?;

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let mut active: service_order::ActiveModel = order.clone().into();
        ledger.write_cache(&mut active)?;
        active.last_payment_at = Set(Some(payment.recorded_at));
        if settling && ledger.balance == Decimal::ZERO {
            active.pending_settlement = Set(false);
        }
        order_records::save_guarded(&txn, active, order_id, order.version).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::PaymentRecorded {
            order_id,
            payment_id: payment.id,
            kind: PaymentKind::Payment,
            amount,
            balance: ledger.balance,
        });
        info!(amount = %amount, balance = %ledger.balance, "payment recorded");

        Ok(PaymentReceipt {
            payment,
            ledger,
            created: true,
        })
    }

    /// Collects money up front. Only while the order is RECEIVED, and never
    /// more than the current total.
    #[instrument(skip(self, actor, advance), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn apply_advance(
        &self,
        actor: &Actor,
        order_id: Uuid,
        advance: AdvancePayment,
    ) -> Result<PaymentReceipt, ServiceError> {
        actor.require(consts::PAYMENTS_CREATE)?;
        advance.validate()?;

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;
        if order.status.is_terminal() {
            return Err(ServiceError::AlreadyTerminal {
                order_id,
                status: order.status,
            });
        }
        if order.status != ServiceOrderStatus::Received {
            return Err(ServiceError::ValidationError(format!(
                "Advances are only taken while the order is RECEIVED, order is {}",
                order.status
            )));
        }

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let amount = ledger.check_payment(advance.amount)?;
        let payment = append_payment(
            &txn,
            order_id,
            PaymentKind::Advance,
            amount,
            &advance.method,
            None,
            actor.id,
        )
        .await?;

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let mut active: service_order::ActiveModel = order.clone().into();
        ledger.write_cache(&mut active)?;
        active.last_payment_at = Set(Some(payment.recorded_at));
        order_records::save_guarded(&txn, active, order_id, order.version).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::PaymentRecorded {
            order_id,
            payment_id: payment.id,
            kind: PaymentKind::Advance,
            amount,
            balance: ledger.balance,
        });

        Ok(PaymentReceipt {
            payment,
            ledger,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AddonService;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn pay(kind: PaymentKind, cents: i64) -> payment::Model {
        payment::Model {
            id: Uuid::new_v4(),
            service_order_id: Uuid::nil(),
            kind,
            amount_cents: cents,
            method: "cash".into(),
            idempotency_key: None,
            recorded_by: Uuid::nil(),
            recorded_at: Utc::now(),
        }
    }

    fn part(cents: i64, restored: bool) -> part_line_item::Model {
        part_line_item::Model {
            id: Uuid::new_v4(),
            service_order_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
            quantity: 1,
            unit_price_cents: cents,
            subtotal_cents: cents,
            created_at: Utc::now(),
            restored_at: restored.then(Utc::now),
        }
    }

    #[test]
    fn total_is_sum_of_components() {
        assert_eq!(
            Ledger::compute_total(dec!(120.00), dec!(30.00), &[dec!(10.00), dec!(5.50)]),
            dec!(165.50)
        );
    }

    #[test]
    fn derived_ledger_tracks_advance_payments_and_refunds() {
        let addons = AddonList(vec![AddonService {
            name: "Cleaning".into(),
            price: dec!(20.00),
        }]);
        let ledger = Ledger::derive(
            dec!(130.00),
            &addons,
            &[part(3_000, false), part(1_500, true)],
            &[],
            &[
                pay(PaymentKind::Advance, 5_000),
                pay(PaymentKind::Payment, 2_000),
                pay(PaymentKind::Refund, 1_000),
            ],
        );
        assert_eq!(ledger.parts_cost, dec!(30.00));
        assert_eq!(ledger.total, dec!(180.00));
        assert_eq!(ledger.paid, dec!(60.00));
        assert_eq!(ledger.balance, dec!(120.00));
        assert_eq!(ledger.total, ledger.service_cost + ledger.parts_cost + ledger.addons_cost);
    }

    #[test]
    fn payment_of_exact_balance_is_accepted_one_cent_more_is_not() {
        let ledger = Ledger::derive(dec!(100.00), &AddonList::default(), &[], &[], &[]);
        assert_eq!(ledger.check_payment(dec!(100.00)).unwrap(), dec!(100.00));
        assert_matches!(
            ledger.check_payment(dec!(100.01)),
            Err(ServiceError::BalanceExceeded { attempted, available })
                if attempted == dec!(100.01) && available == dec!(100.00)
        );
        assert_matches!(
            ledger.check_payment(Decimal::ZERO),
            Err(ServiceError::InvalidAmount(_))
        );
    }

    #[test]
    fn refunds_are_capped_by_money_collected() {
        let ledger = Ledger::derive(
            dec!(150.00),
            &AddonList::default(),
            &[],
            &[],
            &[pay(PaymentKind::Advance, 5_000)],
        );
        assert!(ledger.check_refund(dec!(50.00)).is_ok());
        assert_matches!(
            ledger.check_refund(dec!(50.01)),
            Err(ServiceError::BalanceExceeded { .. })
        );
    }

    #[test]
    fn sales_stay_out_of_the_repair_balance() {
        let sale = point_of_sale_item::Model {
            id: Uuid::new_v4(),
            service_order_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
            quantity: 2,
            unit_price_cents: 1_250,
            subtotal_cents: 2_500,
            created_at: Utc::now(),
        };
        let ledger = Ledger::derive(dec!(50.00), &AddonList::default(), &[], &[sale], &[]);
        assert_eq!(ledger.balance, dec!(50.00));
        assert_eq!(ledger.grand_total(), dec!(75.00));
        assert_eq!(ledger.grand_paid(), dec!(25.00));
    }
}
