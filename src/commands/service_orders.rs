//! Validated inputs for every service order operation.
//!
//! Shape checks (lengths, required collections) live here as `validator`
//! rules; state-dependent rules are enforced by the services.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{AddonService, EquipmentDescriptor, Priority, Receiver, ServiceKind};

/// Money collected when the order is opened.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdvancePayment {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 32, message = "Payment method is required"))]
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateServiceOrderCommand {
    pub site_id: Uuid,
    pub client_id: Uuid,
    #[serde(default)]
    pub technician_id: Option<Uuid>,
    pub service_kind: ServiceKind,
    #[serde(default)]
    pub priority: Priority,
    #[validate(length(min = 1, message = "At least one piece of equipment is required"))]
    pub equipment: Vec<EquipmentDescriptor>,
    pub service_cost: Decimal,
    #[serde(default)]
    pub addons: Vec<AddonService>,
    #[serde(default)]
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(range(min = 0, max = 3650))]
    pub warranty_days: Option<i32>,
    #[serde(default)]
    pub advance: Option<AdvancePayment>,
    /// Retrying intake with the same key returns the order created first.
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

/// One part consumed by the repair. A caller-chosen `line_id` lets later
/// edits refer to the line; it must not already exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PartLineInput {
    #[serde(default)]
    pub line_id: Option<Uuid>,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompleteRepairCommand {
    #[validate(length(max = 4000))]
    pub diagnosis: String,
    #[validate(length(max = 4000))]
    pub solution: String,
    #[serde(default)]
    pub parts: Vec<PartLineInput>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

/// Edits applied to an order that is already REPAIRED. `parts`, when
/// present, is the complete desired set of part lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct EditRepairCommand {
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub diagnosis: Option<String>,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub solution: Option<String>,
    #[serde(default)]
    pub parts: Option<Vec<PartLineInput>>,
    #[serde(default)]
    pub service_cost: Option<Decimal>,
    #[serde(default)]
    pub addons: Option<Vec<AddonService>>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SaleItemInput {
    #[serde(default)]
    pub line_id: Option<Uuid>,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeliverCommand {
    pub delivered_at: DateTime<Utc>,
    pub receiver: Receiver,
    /// Collect the outstanding balance as part of the hand-over.
    #[serde(default)]
    pub balance_paid_now: bool,
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub payment_method: Option<String>,
    /// Hand over with money still owed; the order is flagged for settlement.
    #[serde(default)]
    pub acknowledge_outstanding_balance: bool,
    #[serde(default)]
    pub sale_items: Vec<SaleItemInput>,
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub sale_payment_method: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelServiceOrderCommand {
    #[validate(length(
        min = 1,
        max = 500,
        message = "Reason must be between 1 and 500 characters"
    ))]
    pub reason: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[serde(default)]
    pub refund_amount: Decimal,
    #[serde(default)]
    #[validate(length(min = 1, max = 32))]
    pub refund_method: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordPaymentCommand {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 32, message = "Payment method is required"))]
    pub method: String,
    /// A repeated key on the same order returns the original payment.
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

/// Partial update of order details. Which fields are accepted depends on
/// the order's state and the actor's role.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateDetailsCommand {
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub service_kind: Option<ServiceKind>,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub equipment: Option<Vec<EquipmentDescriptor>>,
    #[serde(default)]
    pub technician_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub service_cost: Option<Decimal>,
    #[serde(default)]
    pub addons: Option<Vec<AddonService>>,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(range(min = 0, max = 3650))]
    pub warranty_days: Option<i32>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

impl UpdateDetailsCommand {
    /// Touches a field only an admin may change once work has started.
    pub fn touches_identity(&self) -> bool {
        self.client_id.is_some() || self.service_kind.is_some() || self.equipment.is_some()
    }

    /// Touches a field that feeds the ledger.
    pub fn touches_costs(&self) -> bool {
        self.service_cost.is_some() || self.addons.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AttachPhotosCommand {
    #[validate(length(min = 1, max = 20))]
    pub urls: Vec<String>,
}
