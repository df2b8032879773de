use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a money movement on a service order.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    /// Collected at intake.
    #[sea_orm(string_value = "ADVANCE")]
    Advance,
    /// Partial or final payment against the balance.
    #[sea_orm(string_value = "PAYMENT")]
    Payment,
    /// Money returned to the client on cancellation.
    #[sea_orm(string_value = "REFUND")]
    Refund,
}

/// Why a stock level changed.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    #[sea_orm(string_value = "REPAIR_CONSUMPTION")]
    RepairConsumption,
    #[sea_orm(string_value = "REPAIR_RETURN")]
    RepairReturn,
    #[sea_orm(string_value = "POINT_OF_SALE")]
    PointOfSale,
    #[sea_orm(string_value = "CANCELLATION_RESTORE")]
    CancellationRestore,
    #[sea_orm(string_value = "ADJUSTMENT")]
    Adjustment,
    #[sea_orm(string_value = "RECEIPT")]
    Receipt,
}
