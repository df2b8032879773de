//! Inputs accepted by the service order engine.

pub mod service_orders;

pub use service_orders::{
    AdvancePayment, AttachPhotosCommand, CancelServiceOrderCommand, CompleteRepairCommand,
    CreateServiceOrderCommand, DeliverCommand, EditRepairCommand, PartLineInput,
    RecordPaymentCommand, SaleItemInput, UpdateDetailsCommand,
};
