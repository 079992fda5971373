//! Error types for flux-billing storage.

use flux_billing_core::{BillingError, OrderPhase};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// An adjustment would drive the balance negative.
    #[error("constraint violation: balance={balance}, delta={delta}")]
    ConstraintViolation {
        /// Balance at the time of the adjustment.
        balance: i64,
        /// Requested delta.
        delta: i64,
    },

    /// Insufficient credits for a debit, detected under the account lock.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The order is not `Pending`.
    #[error("order {order_id} is {phase}")]
    OrderPhase {
        /// The targeted order.
        order_id: String,
        /// Its current phase.
        phase: OrderPhase,
    },
}

impl StoreError {
    /// Shorthand for a missing-record error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredit { balance, required }
            }
            StoreError::ConstraintViolation { balance, delta } => Self::InsufficientCredit {
                balance,
                required: -delta,
            },
            StoreError::OrderPhase { order_id, phase } => Self::OrderPhase {
                order_id,
                phase: Some(phase),
            },
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Storage(msg),
        }
    }
}
