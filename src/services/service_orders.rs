//! The service order state machine.
//!
//! Every mutating operation follows the same shape: check the actor, check
//! the input, open a transaction, load the order, check state and version,
//! apply side effects (stock, payments), write the order back under its
//! version guard, commit, and only then publish events.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts, Actor},
    commands::{
        AttachPhotosCommand, CompleteRepairCommand, CreateServiceOrderCommand, DeliverCommand,
        EditRepairCommand, SaleItemInput, UpdateDetailsCommand,
    },
    config::ServiceOrderSettings,
    entities::{
        inventory_movement, order_number_sequence, part_line_item, payment, point_of_sale_item,
        service_order,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics::{track, SERVICE_ORDERS_CREATED, SERVICE_ORDER_TRANSITIONS},
    models::{
        money::{from_cents, line_subtotal_cents, non_negative_amount, to_cents},
        AddonList, AddonService, CancellationRecord, EquipmentDescriptor, EquipmentList,
        MovementReason, PaymentKind, PhotoList, Receiver, ServiceKind,
        ServiceOrderStatus,
    },
    services::{
        inventory::{InventoryStore, MovementContext},
        ledger::{append_payment, Ledger},
        order_records,
        order_status::{ensure_transition, EditScope},
        parts::PartsConsumptionManager,
    },
};

/// Read-only lookups against the client, technician and site directories.
#[async_trait]
pub trait ReferenceDirectory: Send + Sync {
    async fn client_exists(&self, client_id: Uuid) -> Result<bool, ServiceError>;
    async fn technician_exists(&self, technician_id: Uuid) -> Result<bool, ServiceError>;
    async fn site_exists(&self, site_id: Uuid) -> Result<bool, ServiceError>;
}

/// Directory that trusts every reference. Used when the directories live
/// behind another service that has already validated the ids.
pub struct AcceptAllDirectory;

#[async_trait]
impl ReferenceDirectory for AcceptAllDirectory {
    async fn client_exists(&self, _client_id: Uuid) -> Result<bool, ServiceError> {
        Ok(true)
    }

    async fn technician_exists(&self, _technician_id: Uuid) -> Result<bool, ServiceError> {
        Ok(true)
    }

    async fn site_exists(&self, _site_id: Uuid) -> Result<bool, ServiceError> {
        Ok(true)
    }
}

/// An order together with its rows and derived ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOrderDetails {
    pub order: service_order::Model,
    pub part_lines: Vec<part_line_item::Model>,
    pub sale_items: Vec<point_of_sale_item::Model>,
    pub payments: Vec<payment::Model>,
    pub ledger: Ledger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptPayment {
    pub kind: PaymentKind,
    pub amount: Decimal,
    pub method: String,
    pub recorded_at: DateTime<Utc>,
}

/// Everything the document generator prints, in display units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOrderReceipt {
    pub order_number: String,
    pub status: ServiceOrderStatus,
    pub service_kind: ServiceKind,
    pub client_id: Uuid,
    pub site_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub repaired_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub equipment: Vec<EquipmentDescriptor>,
    pub diagnosis: Option<String>,
    pub solution: Option<String>,
    pub addons: Vec<AddonService>,
    pub parts: Vec<ReceiptLine>,
    pub sale_items: Vec<ReceiptLine>,
    pub payments: Vec<ReceiptPayment>,
    pub ledger: Ledger,
    pub grand_total: Decimal,
    pub grand_paid: Decimal,
    pub warranty_days: i32,
    pub warranty_expires_at: Option<DateTime<Utc>>,
    pub receiver: Option<Receiver>,
    pub cancellation: Option<CancellationRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceOrderFilter {
    pub site_id: Option<Uuid>,
    pub status: Option<ServiceOrderStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOrderPage {
    pub items: Vec<service_order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

#[derive(Clone)]
pub struct ServiceOrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    directory: Arc<dyn ReferenceDirectory>,
    settings: ServiceOrderSettings,
}

impl ServiceOrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        directory: Arc<dyn ReferenceDirectory>,
        settings: ServiceOrderSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            directory,
            settings,
        }
    }

    fn publish(&self, events: Vec<Event>) {
        for event in events {
            self.event_sender.send_or_log(event);
        }
    }

    // ----- intake -----

    /// Opens a new order in RECEIVED, optionally collecting an advance.
    #[instrument(skip(self, actor, command), fields(site_id = %command.site_id, actor_id = %actor.id))]
    pub async fn create(
        &self,
        actor: &Actor,
        command: CreateServiceOrderCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        track("create", self.create_inner(actor, command).await)
    }

    async fn create_inner(
        &self,
        actor: &Actor,
        command: CreateServiceOrderCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_CREATE)?;
        command.validate()?;
        if let Some(advance) = &command.advance {
            advance.validate()?;
        }
        let service_cost = non_negative_amount(command.service_cost, "Service cost")?;
        let addons = normalize_addons(command.addons.clone())?;

        if let Some(key) = &command.idempotency_key {
            let existing = service_order::Entity::find()
                .filter(service_order::Column::IntakeKey.eq(key.clone()))
                .one(&*self.db)
                .await?;
            if let Some(existing) = existing {
                info!(order_id = %existing.id, "intake replayed by idempotency key");
                return load_details(&*self.db, existing).await;
            }
        }

        self.check_references(
            Some(command.site_id),
            Some(command.client_id),
            command.technician_id,
        )
        .await?;

        let txn = self.db.begin().await?;

        let order_number =
            next_order_number(&txn, command.site_id, &self.settings.order_number_prefix).await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let ledger = Ledger::derive(service_cost, &addons, &[], &[], &[]);

        let mut active = service_order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            site_id: Set(command.site_id),
            client_id: Set(command.client_id),
            technician_id: Set(command.technician_id),
            service_kind: Set(command.service_kind),
            priority: Set(command.priority),
            status: Set(ServiceOrderStatus::Received),
            equipment: Set(EquipmentList(command.equipment.clone())),
            diagnosis: Set(None),
            solution: Set(None),
            photos: Set(PhotoList::default()),
            addons: Set(addons),
            service_cost_cents: Set(0),
            parts_cost_cents: Set(0),
            addons_cost_cents: Set(0),
            total_cents: Set(0),
            paid_cents: Set(0),
            balance_cents: Set(0),
            sales_total_cents: Set(0),
            sales_payment_method: Set(None),
            warranty_days: Set(command
                .warranty_days
                .unwrap_or(self.settings.default_warranty_days)),
            received_at: Set(now),
            estimated_delivery_at: Set(command.estimated_delivery_at),
            repaired_at: Set(None),
            delivered_at: Set(None),
            last_payment_at: Set(None),
            cancelled_at: Set(None),
            receiver: Set(None),
            pending_settlement: Set(false),
            cancellation: Set(None),
            intake_key: Set(command.idempotency_key.clone()),
            repair_key: Set(None),
            created_by: Set(actor.id),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        ledger.write_cache(&mut active)?;
        let mut order = active.insert(&txn).await?;

        let mut events = vec![Event::ServiceOrderCreated {
            order_id,
            order_number: order_number.clone(),
            site_id: command.site_id,
        }];

        if let Some(advance) = &command.advance {
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
            order = order_records::save_guarded(&txn, active, order_id, order.version).await?;
            events.push(Event::PaymentRecorded {
                order_id,
                payment_id: payment.id,
                kind: PaymentKind::Advance,
                amount,
                balance: ledger.balance,
            });
        }

        let details = load_details(&txn, order).await?;
        txn.commit().await?;

        SERVICE_ORDERS_CREATED.inc();
        self.publish(events);
        info!(%order_id, %order_number, total = %details.ledger.total, "service order created");
        Ok(details)
    }

    // ----- queries -----

    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn get(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_READ)?;
        let order = order_records::load_order(&*self.db, order_id).await?;
        load_details(&*self.db, order).await
    }

    /// Read-only view for printable receipts.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn receipt(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<ServiceOrderReceipt, ServiceError> {
        let details = self.get(actor, order_id).await?;
        Ok(build_receipt(details))
    }

    /// Newest first. Terminal orders stay listed; nothing is ever deleted.
    #[instrument(skip(self, actor))]
    pub async fn list(
        &self,
        actor: &Actor,
        filter: ServiceOrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<ServiceOrderPage, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_READ)?;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = service_order::Entity::find();
        if let Some(site_id) = filter.site_id {
            query = query.filter(service_order::Column::SiteId.eq(site_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(service_order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(service_order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(ServiceOrderPage {
            items,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        })
    }

    /// Delivered orders that still owe money.
    #[instrument(skip(self, actor))]
    pub async fn list_pending_settlements(
        &self,
        actor: &Actor,
        site_id: Uuid,
    ) -> Result<Vec<service_order::Model>, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_READ)?;
        Ok(service_order::Entity::find()
            .filter(service_order::Column::SiteId.eq(site_id))
            .filter(service_order::Column::PendingSettlement.eq(true))
            .order_by_asc(service_order::Column::DeliveredAt)
            .all(&*self.db)
            .await?)
    }

    /// Stock audit trail of one order.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn movements(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Vec<inventory_movement::Model>, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_READ)?;
        order_records::load_order(&*self.db, order_id).await?;
        InventoryStore::movements_for_order(&*self.db, order_id).await
    }

    // ----- intermediate transitions -----

    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn start_diagnosis(
        &self,
        actor: &Actor,
        order_id: Uuid,
        expected_version: Option<i32>,
    ) -> Result<service_order::Model, ServiceError> {
        self.move_to(actor, order_id, ServiceOrderStatus::Diagnosing, expected_version)
            .await
    }

    /// Workshop and express jobs go to the bench.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn start_repair(
        &self,
        actor: &Actor,
        order_id: Uuid,
        expected_version: Option<i32>,
    ) -> Result<service_order::Model, ServiceError> {
        self.move_to(actor, order_id, ServiceOrderStatus::InRepair, expected_version)
            .await
    }

    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn start_home_visit(
        &self,
        actor: &Actor,
        order_id: Uuid,
        expected_version: Option<i32>,
    ) -> Result<service_order::Model, ServiceError> {
        self.move_to(actor, order_id, ServiceOrderStatus::InHomeVisit, expected_version)
            .await
    }

    async fn move_to(
        &self,
        actor: &Actor,
        order_id: Uuid,
        to: ServiceOrderStatus,
        expected_version: Option<i32>,
    ) -> Result<service_order::Model, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_UPDATE)?;

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;
        ensure_transition(order_id, order.service_kind, order.status, to)?;
        order_records::check_expected_version(&order, expected_version)?;

        let from = order.status;
        let mut active: service_order::ActiveModel = order.clone().into();
        active.status = Set(to);
        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;
        txn.commit().await?;

        SERVICE_ORDER_TRANSITIONS
            .with_label_values(&[&to.to_string()])
            .inc();
        self.publish(vec![Event::ServiceOrderStatusChanged {
            order_id,
            old_status: from,
            new_status: to,
        }]);
        info!(%from, %to, "service order status changed");
        Ok(updated)
    }

    // ----- repair -----

    /// Marks the order REPAIRED, consuming the submitted parts from stock.
    /// Either every line is deducted and recorded or nothing changes.
    #[instrument(skip(self, actor, command), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn complete_repair(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: CompleteRepairCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        track(
            "complete_repair",
            self.complete_repair_inner(actor, order_id, command).await,
        )
    }

    async fn complete_repair_inner(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: CompleteRepairCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_REPAIR)?;
        command.validate()?;

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;

        if order.status == ServiceOrderStatus::Repaired
            && command.idempotency_key.is_some()
            && order.repair_key == command.idempotency_key
        {
            info!("repair completion replayed by idempotency key");
            return load_details(&txn, order).await;
        }

        ensure_transition(
            order_id,
            order.service_kind,
            order.status,
            ServiceOrderStatus::Repaired,
        )?;
        // Completing from REPAIRED is the edit-repair flow, not a new completion.
        if order.status == ServiceOrderStatus::Repaired {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: ServiceOrderStatus::Repaired,
            });
        }
        order_records::check_expected_version(&order, command.expected_version)?;
        let diagnosis = required_text(&command.diagnosis, "diagnosis")?;
        let solution = required_text(&command.solution, "solution")?;

        let mut events = Vec::new();
        PartsConsumptionManager::consume(&txn, &order, &command.parts, &mut events).await?;

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let repaired_at = Utc::now();
        let from = order.status;
        let mut active: service_order::ActiveModel = order.clone().into();
        active.status = Set(ServiceOrderStatus::Repaired);
        active.diagnosis = Set(Some(diagnosis));
        active.solution = Set(Some(solution));
        active.repaired_at = Set(Some(repaired_at));
        active.repair_key = Set(command.idempotency_key.clone());
        ledger.write_cache(&mut active)?;
        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;

        let details = load_details(&txn, updated).await?;
        txn.commit().await?;

        SERVICE_ORDER_TRANSITIONS
            .with_label_values(&[&ServiceOrderStatus::Repaired.to_string()])
            .inc();
        events.push(Event::ServiceOrderStatusChanged {
            order_id,
            old_status: from,
            new_status: ServiceOrderStatus::Repaired,
        });
        events.push(Event::ServiceOrderRepaired {
            order_id,
            total: details.ledger.total,
            repaired_at,
        });
        self.publish(events);
        info!(total = %details.ledger.total, balance = %details.ledger.balance, "repair completed");
        Ok(details)
    }

    /// Edits a REPAIRED order. When `parts` is given it is the full desired
    /// line set and stock is reconciled against the current lines.
    #[instrument(skip(self, actor, command), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn edit_repair(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: EditRepairCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        track(
            "edit_repair",
            self.edit_repair_inner(actor, order_id, command).await,
        )
    }

    async fn edit_repair_inner(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: EditRepairCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_REPAIR)?;
        command.validate()?;

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;
        ensure_transition(
            order_id,
            order.service_kind,
            order.status,
            ServiceOrderStatus::Repaired,
        )?;
        if order.status != ServiceOrderStatus::Repaired {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: ServiceOrderStatus::Repaired,
            });
        }
        order_records::check_expected_version(&order, command.expected_version)?;

        let diagnosis = command
            .diagnosis
            .as_deref()
            .map(|d| required_text(d, "diagnosis"))
            .transpose()?;
        let solution = command
            .solution
            .as_deref()
            .map(|s| required_text(s, "solution"))
            .transpose()?;
        let service_cost = command
            .service_cost
            .map(|c| non_negative_amount(c, "Service cost"))
            .transpose()?;
        let addons = command.addons.clone().map(normalize_addons).transpose()?;

        let mut events = Vec::new();
        if let Some(parts) = &command.parts {
            let outcome = PartsConsumptionManager::reconcile(&txn, &order, parts).await?;
            events.extend(outcome.events);
        }

        let mut active: service_order::ActiveModel = order.clone().into();
        if let Some(diagnosis) = diagnosis {
            active.diagnosis = Set(Some(diagnosis));
        }
        if let Some(solution) = solution {
            active.solution = Set(Some(solution));
        }
        let effective_cost = service_cost.unwrap_or_else(|| from_cents(order.service_cost_cents));
        let effective_addons = addons.clone().unwrap_or_else(|| order.addons.clone());
        if let Some(cost) = service_cost {
            active.service_cost_cents = Set(to_cents(cost)?);
        }
        if let Some(addons) = addons {
            active.addons = Set(addons);
        }

        let parts = order_records::active_part_lines(&txn, order_id).await?;
        let sales = order_records::sale_items(&txn, order_id).await?;
        let payments = order_records::payments(&txn, order_id).await?;
        let ledger = Ledger::derive(effective_cost, &effective_addons, &parts, &sales, &payments);
        ledger.check_total_covers_paid()?;
        ledger.write_cache(&mut active)?;

        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;
        let details = load_details(&txn, updated).await?;
        txn.commit().await?;

        self.publish(events);
        info!(total = %details.ledger.total, "repair edited");
        Ok(details)
    }

    /// Takes one part line off a REPAIRED order and puts its stock back.
    #[instrument(skip(self, actor), fields(order_id = %order_id, line_id = %line_id))]
    pub async fn remove_part_line(
        &self,
        actor: &Actor,
        order_id: Uuid,
        line_id: Uuid,
        expected_version: Option<i32>,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_REPAIR)?;

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;
        order_records::check_expected_version(&order, expected_version)?;

        let mut events = Vec::new();
        PartsConsumptionManager::remove_line(&txn, &order, line_id, &mut events).await?;

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        ledger.check_total_covers_paid()?;
        let mut active: service_order::ActiveModel = order.clone().into();
        ledger.write_cache(&mut active)?;
        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;
        let details = load_details(&txn, updated).await?;
        txn.commit().await?;

        self.publish(events);
        Ok(details)
    }

    // ----- delivery -----

    /// Hands the equipment over. The balance must be zero, paid now, or
    /// explicitly left outstanding, in which case the order is flagged for
    /// later settlement.
    #[instrument(skip(self, actor, command), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn deliver(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: DeliverCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        track("deliver", self.deliver_inner(actor, order_id, command).await)
    }

    async fn deliver_inner(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: DeliverCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_DELIVER)?;
        command.validate()?;

        if command.delivered_at > Utc::now() {
            return Err(ServiceError::ValidationError(
                "Delivery date cannot be in the future".to_string(),
            ));
        }
        if let Receiver::ThirdParty { name, document_id } = &command.receiver {
            required_text(name, "receiver.name")?;
            required_text(document_id, "receiver.document_id")?;
        }
        validate_sale_items(&command.sale_items)?;
        if !command.sale_items.is_empty() && command.sale_payment_method.is_none() {
            return Err(ServiceError::MissingRequiredField(
                "sale_payment_method".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;
        ensure_transition(
            order_id,
            order.service_kind,
            order.status,
            ServiceOrderStatus::Delivered,
        )?;
        order_records::check_expected_version(&order, command.expected_version)?;

        let ledger = order_records::derive_ledger(&txn, &order).await?;
        let settlement = decide_settlement(&ledger, &command)?;

        let mut demand: BTreeMap<Uuid, i64> = BTreeMap::new();
        for item in &command.sale_items {
            if let Some(line_id) = item.line_id {
                if point_of_sale_item::Entity::find_by_id(line_id)
                    .one(&txn)
                    .await?
                    .is_some()
                {
                    return Err(ServiceError::Conflict(format!(
                        "Sale line {} is already recorded",
                        line_id
                    )));
                }
            }
            *demand.entry(item.product_id).or_default() += i64::from(item.quantity);
        }
        InventoryStore::ensure_available(&txn, order.site_id, &demand).await?;

        let mut events = Vec::new();
        for item in &command.sale_items {
            let line_id = item.line_id.unwrap_or_else(Uuid::new_v4);
            events.push(
                InventoryStore::deduct(
                    &txn,
                    item.product_id,
                    order.site_id,
                    item.quantity,
                    MovementContext::for_line(MovementReason::PointOfSale, order_id, line_id),
                )
                .await?,
            );
            let unit_price_cents = to_cents(non_negative_amount(item.unit_price, "Unit price")?)?;
            let subtotal_cents = line_subtotal_cents(unit_price_cents, item.quantity)?;
            point_of_sale_item::ActiveModel {
                id: Set(line_id),
                service_order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price_cents: Set(unit_price_cents),
                subtotal_cents: Set(subtotal_cents),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;
        }

        let mut active: service_order::ActiveModel = order.clone().into();
        if let Settlement::PaidNow { amount, method } = &settlement {
            let payment = append_payment(
                &txn,
                order_id,
                PaymentKind::Payment,
                *amount,
                method,
                None,
                actor.id,
            )
            .await?;
            active.last_payment_at = Set(Some(payment.recorded_at));
            events.push(Event::PaymentRecorded {
                order_id,
                payment_id: payment.id,
                kind: PaymentKind::Payment,
                amount: *amount,
                balance: Decimal::ZERO,
            });
        }

        let pending_settlement = matches!(settlement, Settlement::Outstanding);
        let ledger = order_records::derive_ledger(&txn, &order).await?;
        ledger.write_cache(&mut active)?;
        active.status = Set(ServiceOrderStatus::Delivered);
        active.delivered_at = Set(Some(command.delivered_at));
        active.receiver = Set(Some(command.receiver.clone()));
        active.pending_settlement = Set(pending_settlement);
        if !command.sale_items.is_empty() {
            active.sales_payment_method = Set(command.sale_payment_method.clone());
        }
        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;

        let details = load_details(&txn, updated).await?;
        txn.commit().await?;

        if pending_settlement {
            warn!(balance = %ledger.balance, "delivered with outstanding balance");
        }
        SERVICE_ORDER_TRANSITIONS
            .with_label_values(&[&ServiceOrderStatus::Delivered.to_string()])
            .inc();
        events.push(Event::ServiceOrderStatusChanged {
            order_id,
            old_status: order.status,
            new_status: ServiceOrderStatus::Delivered,
        });
        events.push(Event::ServiceOrderDelivered {
            order_id,
            pending_settlement,
            delivered_at: command.delivered_at,
        });
        self.publish(events);
        info!(pending_settlement, "service order delivered");
        Ok(details)
    }

    // ----- details -----

    /// Edits order details within what the current state allows.
    #[instrument(skip(self, actor, command), fields(order_id = %order_id, actor_id = %actor.id))]
    pub async fn update_details(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: UpdateDetailsCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        track(
            "update_details",
            self.update_details_inner(actor, order_id, command).await,
        )
    }

    async fn update_details_inner(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: UpdateDetailsCommand,
    ) -> Result<ServiceOrderDetails, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_UPDATE)?;
        command.validate()?;
        let service_cost = command
            .service_cost
            .map(|c| non_negative_amount(c, "Service cost"))
            .transpose()?;
        let addons = command.addons.clone().map(normalize_addons).transpose()?;
        self.check_references(None, command.client_id, command.technician_id)
            .await?;

        let txn = self.db.begin().await?;
        // The scope is decided on the row this transaction writes back, so a
        // transition that lands first changes what may be edited.
        let order = order_records::load_order(&txn, order_id).await?;
        match EditScope::for_status(order.status) {
            EditScope::Full => {}
            EditScope::CostsOnly => {
                if command.touches_identity() && !actor.is_admin() {
                    return Err(ServiceError::Unauthorized(format!(
                        "identity fields of a {} order need an admin",
                        order.status
                    )));
                }
            }
            EditScope::RepairOnly => {
                if command.touches_identity() || command.touches_costs() || command.diagnosis.is_some()
                {
                    return Err(ServiceError::ValidationError(
                        "Repaired orders change costs, parts and diagnosis through edit repair"
                            .to_string(),
                    ));
                }
            }
            EditScope::Frozen => {
                return Err(ServiceError::AlreadyTerminal {
                    order_id,
                    status: order.status,
                });
            }
        }
        order_records::check_expected_version(&order, command.expected_version)?;

        let mut active: service_order::ActiveModel = order.clone().into();
        if let Some(client_id) = command.client_id {
            active.client_id = Set(client_id);
        }
        if let Some(kind) = command.service_kind {
            active.service_kind = Set(kind);
        }
        if let Some(equipment) = &command.equipment {
            active.equipment = Set(EquipmentList(equipment.clone()));
        }
        if let Some(technician_id) = command.technician_id {
            active.technician_id = Set(Some(technician_id));
        }
        if let Some(priority) = command.priority {
            active.priority = Set(priority);
        }
        if let Some(diagnosis) = &command.diagnosis {
            active.diagnosis = Set(Some(diagnosis.trim().to_string()));
        }
        if let Some(estimated) = command.estimated_delivery_at {
            active.estimated_delivery_at = Set(Some(estimated));
        }
        if let Some(days) = command.warranty_days {
            active.warranty_days = Set(days);
        }

        if service_cost.is_some() || addons.is_some() {
            let effective_cost =
                service_cost.unwrap_or_else(|| from_cents(order.service_cost_cents));
            let effective_addons = addons.clone().unwrap_or_else(|| order.addons.clone());
            let parts = order_records::active_part_lines(&txn, order_id).await?;
            let sales = order_records::sale_items(&txn, order_id).await?;
            let payments = order_records::payments(&txn, order_id).await?;
            let ledger =
                Ledger::derive(effective_cost, &effective_addons, &parts, &sales, &payments);
            ledger.check_total_covers_paid()?;
            if let Some(addons) = addons {
                active.addons = Set(addons);
            }
            ledger.write_cache(&mut active)?;
        }

        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;
        let details = load_details(&txn, updated).await?;
        txn.commit().await?;
        Ok(details)
    }

    /// Appends photo handles from the storage collaborator.
    #[instrument(skip(self, actor, command), fields(order_id = %order_id))]
    pub async fn attach_photos(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: AttachPhotosCommand,
    ) -> Result<service_order::Model, ServiceError> {
        actor.require(consts::SERVICE_ORDERS_UPDATE)?;
        command.validate()?;
        for url in &command.urls {
            required_text(url, "urls")?;
        }

        let txn = self.db.begin().await?;
        let order = order_records::load_order(&txn, order_id).await?;
        if order.status.is_terminal() {
            return Err(ServiceError::AlreadyTerminal {
                order_id,
                status: order.status,
            });
        }
        let mut photos = order.photos.clone();
        photos.0.extend(command.urls.iter().map(|u| u.trim().to_string()));
        let mut active: service_order::ActiveModel = order.clone().into();
        active.photos = Set(photos);
        let updated = order_records::save_guarded(&txn, active, order_id, order.version).await?;
        txn.commit().await?;
        Ok(updated)
    }

    async fn check_references(
        &self,
        site_id: Option<Uuid>,
        client_id: Option<Uuid>,
        technician_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if let Some(id) = site_id {
            if !self.directory.site_exists(id).await? {
                return Err(ServiceError::NotFound(format!("Site {} not found", id)));
            }
        }
        if let Some(id) = client_id {
            if !self.directory.client_exists(id).await? {
                return Err(ServiceError::NotFound(format!("Client {} not found", id)));
            }
        }
        if let Some(id) = technician_id {
            if !self.directory.technician_exists(id).await? {
                return Err(ServiceError::NotFound(format!("Technician {} not found", id)));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Settlement {
    Settled,
    PaidNow { amount: Decimal, method: String },
    Outstanding,
}

fn decide_settlement(ledger: &Ledger, command: &DeliverCommand) -> Result<Settlement, ServiceError> {
    if ledger.balance <= Decimal::ZERO {
        return Ok(Settlement::Settled);
    }
    if command.balance_paid_now {
        let method = command
            .payment_method
            .clone()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ServiceError::MissingRequiredField("payment_method".to_string()))?;
        let amount = ledger.check_payment(ledger.balance)?;
        return Ok(Settlement::PaidNow { amount, method });
    }
    if command.acknowledge_outstanding_balance {
        return Ok(Settlement::Outstanding);
    }
    Err(ServiceError::MissingRequiredField(
        "balance_paid_now or acknowledge_outstanding_balance".to_string(),
    ))
}

fn required_text(value: &str, field: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::MissingRequiredField(field.to_string()));
    }
    Ok(trimmed.to_string())
}

fn normalize_addons(addons: Vec<AddonService>) -> Result<AddonList, ServiceError> {
    let mut normalized = Vec::with_capacity(addons.len());
    for addon in addons {
        let name = required_text(&addon.name, "addons.name")?;
        let price = non_negative_amount(addon.price, "Addon price")?;
        normalized.push(AddonService { name, price });
    }
    Ok(AddonList(normalized))
}

fn validate_sale_items(items: &[SaleItemInput]) -> Result<(), ServiceError> {
    let mut seen = HashSet::new();
    for item in items {
        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be greater than zero, got {}",
                item.product_id, item.quantity
            )));
        }
        item.validate()?;
        let unit_price_cents = to_cents(non_negative_amount(item.unit_price, "Unit price")?)?;
        line_subtotal_cents(unit_price_cents, item.quantity)?;
        if let Some(id) = item.line_id {
            if !seen.insert(id) {
                return Err(ServiceError::ValidationError(format!(
                    "Sale line {} appears more than once",
                    id
                )));
            }
        }
    }
    Ok(())
}

async fn next_order_number<C: ConnectionTrait>(
    conn: &C,
    site_id: Uuid,
    prefix: &str,
) -> Result<String, ServiceError> {
    let result = order_number_sequence::Entity::update_many()
        .col_expr(
            order_number_sequence::Column::LastValue,
            Expr::col(order_number_sequence::Column::LastValue).add(1),
        )
        .filter(order_number_sequence::Column::SiteId.eq(site_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        order_number_sequence::ActiveModel {
            site_id: Set(site_id),
            last_value: Set(1),
        }
        .insert(conn)
        .await?;
    }

    let sequence = order_number_sequence::Entity::find_by_id(site_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError(format!("order number sequence for site {} vanished", site_id))
        })?;

    Ok(format_order_number(prefix, sequence.last_value))
}

pub fn format_order_number(prefix: &str, value: i64) -> String {
    format!("{}-{:06}", prefix, value)
}

pub(crate) async fn load_details<C: ConnectionTrait>(
    conn: &C,
    order: service_order::Model,
) -> Result<ServiceOrderDetails, ServiceError> {
    let part_lines = order_records::all_part_lines(conn, order.id).await?;
    let sale_items = order_records::sale_items(conn, order.id).await?;
    let payments = order_records::payments(conn, order.id).await?;
    let ledger = Ledger::derive(
        from_cents(order.service_cost_cents),
        &order.addons,
        &part_lines,
        &sale_items,
        &payments,
    );
    Ok(ServiceOrderDetails {
        order,
        part_lines,
        sale_items,
        payments,
        ledger,
    })
}

fn build_receipt(details: ServiceOrderDetails) -> ServiceOrderReceipt {
    let ServiceOrderDetails {
        order,
        part_lines,
        sale_items,
        payments,
        ledger,
    } = details;

    let parts = part_lines
        .iter()
        .filter(|line| line.restored_at.is_none())
        .map(|line| ReceiptLine {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: from_cents(line.unit_price_cents),
            subtotal: from_cents(line.subtotal_cents),
        })
        .collect();
    let sale_items = sale_items
        .iter()
        .map(|item| ReceiptLine {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: from_cents(item.unit_price_cents),
            subtotal: from_cents(item.subtotal_cents),
        })
        .collect();
    let payments = payments
        .iter()
        .map(|p| ReceiptPayment {
            kind: p.kind,
            amount: from_cents(p.amount_cents),
            method: p.method.clone(),
            recorded_at: p.recorded_at,
        })
        .collect();
    let warranty_expires_at = order
        .delivered_at
        .map(|at| at + Duration::days(i64::from(order.warranty_days)));

    ServiceOrderReceipt {
        order_number: order.order_number,
        status: order.status,
        service_kind: order.service_kind,
        client_id: order.client_id,
        site_id: order.site_id,
        received_at: order.received_at,
        estimated_delivery_at: order.estimated_delivery_at,
        repaired_at: order.repaired_at,
        delivered_at: order.delivered_at,
        cancelled_at: order.cancelled_at,
        equipment: order.equipment.0,
        diagnosis: order.diagnosis,
        solution: order.solution,
        addons: order.addons.0,
        parts,
        sale_items,
        payments,
        grand_total: ledger.grand_total(),
        grand_paid: ledger.grand_paid(),
        ledger,
        warranty_days: order.warranty_days,
        warranty_expires_at,
        receiver: order.receiver,
        cancellation: order.cancellation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn deliver_command() -> DeliverCommand {
        DeliverCommand {
            delivered_at: Utc::now(),
            receiver: Receiver::Client,
            balance_paid_now: false,
            payment_method: None,
            acknowledge_outstanding_balance: false,
            sale_items: vec![],
            sale_payment_method: None,
            expected_version: None,
        }
    }

    fn ledger_with_balance(balance: Decimal) -> Ledger {
        Ledger::derive(balance, &AddonList::default(), &[], &[], &[])
    }

    #[test]
    fn order_numbers_are_zero_padded() {
        assert_eq!(format_order_number("OS", 42), "OS-000042");
        assert_eq!(format_order_number("WS", 1_234_567), "WS-1234567");
    }

    #[test]
    fn settled_orders_need_no_payment_decision() {
        let ledger = ledger_with_balance(Decimal::ZERO);
        assert_matches!(
            decide_settlement(&ledger, &deliver_command()),
            Ok(Settlement::Settled)
        );
    }

    #[test]
    fn paying_now_requires_a_method_and_collects_the_balance() {
        let ledger = ledger_with_balance(dec!(130.00));
        let mut cmd = deliver_command();
        cmd.balance_paid_now = true;
        assert_matches!(
            decide_settlement(&ledger, &cmd),
            Err(ServiceError::MissingRequiredField(f)) if f == "payment_method"
        );
        cmd.payment_method = Some("card".into());
        assert_matches!(
            decide_settlement(&ledger, &cmd),
            Ok(Settlement::PaidNow { amount, .. }) if amount == dec!(130.00)
        );
    }

    #[test]
    fn outstanding_balance_needs_acknowledgement() {
        let ledger = ledger_with_balance(dec!(10.00));
        let mut cmd = deliver_command();
        assert_matches!(
            decide_settlement(&ledger, &cmd),
            Err(ServiceError::MissingRequiredField(_))
        );
        cmd.acknowledge_outstanding_balance = true;
        assert_matches!(decide_settlement(&ledger, &cmd), Ok(Settlement::Outstanding));
    }

    #[test]
    fn blank_text_is_missing() {
        assert_matches!(
            required_text("   ", "diagnosis"),
            Err(ServiceError::MissingRequiredField(f)) if f == "diagnosis"
        );
        assert_eq!(required_text(" ok ", "solution").unwrap(), "ok");
    }

    #[test]
    fn addons_are_rounded_and_named() {
        let addons = normalize_addons(vec![AddonService {
            name: " Cleaning ".into(),
            price: dec!(9.999),
        }])
        .unwrap();
        assert_eq!(addons.0[0].name, "Cleaning");
        assert_eq!(addons.0[0].price, dec!(10.00));
        assert!(normalize_addons(vec![AddonService {
            name: "".into(),
            price: dec!(1),
        }])
        .is_err());
    }
}
