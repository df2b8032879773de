// Service order lifecycle
pub mod cancellation;
pub mod order_status;
pub mod service_orders;

// Stock and money
pub mod inventory;
pub mod ledger;
pub mod parts;

// Row helpers shared by the services above
pub(crate) mod order_records;
