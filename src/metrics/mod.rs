//! Prometheus counters for the service order engine.
//!
//! Every counter registers itself with [`REGISTRY`] on first use, and
//! [`render`] exposes the registry in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref SERVICE_ORDERS_CREATED: IntCounter = {
        let counter = IntCounter::new(
            "service_orders_created_total",
            "Total number of service orders taken in",
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
    pub static ref SERVICE_ORDER_TRANSITIONS: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "service_order_transitions_total",
                "Status transitions applied to service orders",
            ),
            &["to"],
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
    pub static ref PAYMENTS_RECORDED: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "service_order_payments_total",
                "Ledger entries appended to service orders",
            ),
            &["kind"],
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
    pub static ref STOCK_MOVEMENTS: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "inventory_stock_movements_total",
                "Stock movements written to the inventory store",
            ),
            &["reason"],
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
    pub static ref OPERATION_FAILURES: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "service_order_operation_failures_total",
                "Failed service order operations by error code",
            ),
            &["operation", "error_type"],
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
}

/// Counts a failed operation under its stable error code.
pub fn record_failure(operation: &str, error: &ServiceError) {
    OPERATION_FAILURES
        .with_label_values(&[operation, error.code()])
        .inc();
}

/// Passes `result` through, counting it when it is an error.
pub fn track<T>(operation: &str, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
    if let Err(e) = &result {
        record_failure(operation, e);
    }
    result
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> Result<String, ServiceError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics are not valid UTF-8: {}", e)))
}
