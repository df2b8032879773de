use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AddonList, CancellationRecord, EquipmentList, PhotoList, Priority, Receiver, ServiceKind,
    ServiceOrderStatus,
};

/// The `service_orders` table.
///
/// Ledger columns (`*_cents`) are a cache of the values derived from the
/// part, sale and payment rows; they are rewritten on every mutation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable number, unique and monotonic per site.
    pub order_number: String,

    pub site_id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Option<Uuid>,

    pub service_kind: ServiceKind,
    pub priority: Priority,
    pub status: ServiceOrderStatus,

    #[sea_orm(column_type = "Json")]
    pub equipment: EquipmentList,
    pub diagnosis: Option<String>,
    pub solution: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub photos: PhotoList,
    #[sea_orm(column_type = "Json")]
    pub addons: AddonList,

    pub service_cost_cents: i64,
    pub parts_cost_cents: i64,
    pub addons_cost_cents: i64,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub balance_cents: i64,
    pub sales_total_cents: i64,
    pub sales_payment_method: Option<String>,

    pub warranty_days: i32,
    pub received_at: DateTime<Utc>,
    pub estimated_delivery_at: Option<DateTime<Utc>>,
    pub repaired_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    #[sea_orm(column_type = "Json", nullable)]
    pub receiver: Option<Receiver>,
    /// Delivered with an acknowledged outstanding balance.
    pub pending_settlement: bool,
    #[sea_orm(column_type = "Json", nullable)]
    pub cancellation: Option<CancellationRecord>,

    /// Client-supplied key that makes intake retries safe.
    #[sea_orm(unique)]
    pub intake_key: Option<String>,
    /// Key of the request that completed the repair.
    pub repair_key: Option<String>,

    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic lock, incremented by every write.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::part_line_item::Entity")]
    PartLineItems,
    #[sea_orm(has_many = "super::point_of_sale_item::Entity")]
    PointOfSaleItems,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::part_line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PartLineItems.def()
    }
}

impl Related<super::point_of_sale_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PointOfSaleItems.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
