use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts, Actor},
    commands::CancelServiceOrderCommand,
    entities::service_order,
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{track, SERVICE_ORDER_TRANSITIONS},
    models::{money::round_money, CancellationRecord, PaymentKind, ServiceOrderStatus},
    services::{
        ledger::append_payment,
        order_records,
        order_status::ensure_transition,
        parts::PartsConsumptionManager,
        service_orders::{load_details, ServiceOrderDetails},
    },
};

/// Cancels orders, returning consumed parts to stock and refunding money
/// collected so far.
#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl CancellationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// All or nothing: if any restore or the refund fails the order stays
    /// as it was.
    #[instrument(skip(self, actor, command), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn cancel(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: CancelServiceOrderCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        track("cancel", self.cancel_inner(actor, order_id, command).await)
    }

    async fn cancel_inner(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: CancelServiceOrderCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_CANCEL)?;
        command.validate()?;
        let reason = command.reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::MissingRequiredField("reason".to_string()));
        }

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;
        ensure_transition(
            order_id,
            order.service_kind,
            order.status,
            ServiceOrderStatus::Cancelled,
        )?;
        order_records::check_expected_version(&order, command.expected_version)?;

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let refund_amount = round_money(command.refund_amount);
        if refund_amount < Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(format!(
                "Refund amount cannot be negative, got {}",
                command.refund_amount
            )));
        }
        let refund = if refund_amount > Decimal::ZERO {
            let method = command
                .refund_method
                .clone()
                .filter(|m| !m.trim().is_empty())
                .ok_or_else(|| ServiceError::MissingRequiredField("refund_method".to_string()))?;
            Some((ledger.check_refund(refund_amount)?, method))
        } else {
            None
        };

        let mut events = Vec::new();
        let restored_units = PartsConsumptionManager::restore_all(&txn, &order, &mut events).await?;

        if let Some((amount, method)) = &refund {
            let payment = append_payment(
                &txn,
                order_id,
                PaymentKind::Refund,
                *amount,
                method,
                None,
                actor.id,
            )
            .await?;
            events.push(Event::PaymentRecorded {
                order_id,
                payment_id: payment.id,
                kind: PaymentKind::Refund,
                amount: *amount,
                balance: Decimal::ZERO,
            });
        }

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let mut active: service_order::ActiveModel = order.clone().into();
        ledger.write_cache(&mut active)?;
        active.status = Set(ServiceOrderStatus::Cancelled);
        active.cancelled_at = Set(Some(Utc::now()));
        active.pending_settlement = Set(false);
        active.cancellation = Set(Some(CancellationRecord {
            reason: reason.clone(),
            notes: command.notes.clone(),
            refunded_amount: refund_amount,
            refund_method: refund.as_ref().map(|(_, m)| m.clone()),
            cancelled_by: actor.id,
        }));
        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;

        let details = load_details(&txn, updated).await?;
        txn.commit().await?;

        // The refund event reports the balance after cancellation.
        for event in events.iter_mut() {
            if let Event::PaymentRecorded { balance, .. } = event {
                *balance = ledger.balance;
            }
        }
        SERVICE_ORDER_TRANSITIONS
            .with_label_values(&[&ServiceOrderStatus::Cancelled.to_string()])
            .inc();
        events.push(Event::ServiceOrderStatusChanged {
            order_id,
            old_status: order.status,
            new_status: ServiceOrderStatus::Cancelled,
        });
        events.push(Event::ServiceOrderCancelled {
            order_id,
            reason,
            refunded_amount: refund_amount,
        });
        for event in events {
            self.event_sender.send_or_log(event);
        }
        info!(restored_units, refunded = %refund_amount, "service order cancelled");
        Ok(details)
    }
}
