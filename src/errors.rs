use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ServiceOrderStatus;

/// Error body returned by every HTTP endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ServiceOrderStatus,
        to: ServiceOrderStatus,
    },

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i64,
        available: i32,
    },

    #[error("Amount {attempted} exceeds the maximum allowed amount of {available}")]
    BalanceExceeded {
        attempted: Decimal,
        available: Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service order {order_id} is {status} and can no longer be modified")]
    AlreadyTerminal {
        order_id: Uuid,
        status: ServiceOrderStatus,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Wraps any database error.
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::MissingRequiredField(_) | Self::InvalidAmount(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. } | Self::AlreadyTerminal { .. } | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::InsufficientStock { .. } | Self::BalanceExceeded { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "internal_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::MissingRequiredField(_) => "missing_required_field",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::BalanceExceeded { .. } => "balance_exceeded",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::Unauthorized(_) => "unauthorized",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::Conflict(_) => "conflict",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors and authorization failures return generic messages.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::Unauthorized(_) => "Not permitted".to_string(),
            _ => self.to_string(),
        }
    }

    /// True when the caller should re-read the order before retrying.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::MissingRequiredField("diagnosis".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                product_id: Uuid::nil(),
                requested: 5,
                available: 3,
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InvalidTransition {
                from: ServiceOrderStatus::Received,
                to: ServiceOrderStatus::Delivered,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Unauthorized("cancel".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::Conflict("stale".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn insufficient_stock_names_product_and_shortfall() {
        let product_id = Uuid::new_v4();
        let message = ServiceError::InsufficientStock {
            product_id,
            requested: 5,
            available: 3,
        }
        .response_message();
        assert!(message.contains(&product_id.to_string()));
        assert!(message.contains("requested 5"));
        assert!(message.contains("available 3"));
    }

    #[test]
    fn balance_exceeded_states_maximum_allowed() {
        let message = ServiceError::BalanceExceeded {
            attempted: Decimal::new(10001, 2),
            available: Decimal::new(10000, 2),
        }
        .response_message();
        assert!(message.contains("100.01"));
        assert!(message.contains("100.00"));
    }

    #[test]
    fn unauthorized_and_internal_errors_hide_details() {
        assert_eq!(
            ServiceError::Unauthorized("order 42 belongs to another site".into())
                .response_message(),
            "Not permitted"
        );
        assert_eq!(
            ServiceError::InternalError("pool exhausted".into()).response_message(),
            "Internal server error"
        );
    }

    #[test]
    fn only_conflicts_ask_for_a_fresh_read() {
        assert!(ServiceError::Conflict("version moved".into()).is_retryable_conflict());
        assert!(!ServiceError::InvalidTransition {
            from: ServiceOrderStatus::Repaired,
            to: ServiceOrderStatus::Repaired,
        }
        .is_retryable_conflict());
    }
}
