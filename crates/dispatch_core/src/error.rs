//! Error taxonomy for the dispatch core.

use thiserror::Error;

use crate::model::{DriverId, TripStatus};

/// Errors surfaced by lifecycle, dispatch and location operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// Input rejected before any state was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Transition attempted from a status that does not permit it.
    #[error("conflict: {reason} (status: {status})")]
    Conflict {
        reason: &'static str,
        status: TripStatus,
    },

    #[error("driver {driver_id} is not authorized: {reason}")]
    Authorization {
        driver_id: DriverId,
        reason: &'static str,
    },

    /// Persistence or payment collaborator failed.
    #[error("{service} failure: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },
}

impl DispatchError {
    pub fn trip_not_found(id: impl ToString) -> Self {
        DispatchError::NotFound {
            entity: "trip",
            id: id.to_string(),
        }
    }

    pub fn driver_not_found(id: impl ToString) -> Self {
        DispatchError::NotFound {
            entity: "driver",
            id: id.to_string(),
        }
    }

    pub fn conflict(reason: &'static str, status: TripStatus) -> Self {
        DispatchError::Conflict { reason, status }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        DispatchError::ExternalService {
            service: "persistence",
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::Conflict { .. })
    }
}

/// Failure reported by the payment collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("charge declined: {0}")]
    Declined(String),

    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid charge amount: {0}")]
    InvalidAmount(i64),

    /// The trip was already charged a different amount.
    #[error("trip already charged {expected}, refusing {got}")]
    IdempotencyMismatch { expected: i64, got: i64 },
}

impl From<PaymentError> for DispatchError {
    fn from(err: PaymentError) -> Self {
        DispatchError::ExternalService {
            service: "payment",
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_surface_as_external_service_failures() {
        let err: DispatchError = PaymentError::Declined("insufficient funds".into()).into();
        assert_eq!(
            err,
            DispatchError::ExternalService {
                service: "payment",
                message: "charge declined: insufficient funds".into(),
            }
        );
    }

    #[test]
    fn conflict_message_includes_status() {
        let err = DispatchError::conflict("trip not available", TripStatus::Accepted);
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "conflict: trip not available (status: accepted)");
    }
}
