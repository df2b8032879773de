//! Domain value types shared by entities, services and handlers.

pub mod ledger_types;
pub mod money;
pub mod service_order;

pub use ledger_types::{MovementReason, PaymentKind};
pub use service_order::{
    AddonList, AddonService, CancellationRecord, EquipmentDescriptor, EquipmentList, PhotoList,
    Priority, ReceivedCondition, Receiver, ServiceKind, ServiceOrderStatus,
};
