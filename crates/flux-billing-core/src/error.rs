//! Error types for flux-billing.

use crate::ids::IdError;
use crate::order::OrderPhase;

/// Result type for flux-billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in flux-billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// No authenticated principal.
    #[error("not authenticated")]
    Unauthenticated,

    /// Too many requests in the current window.
    #[error("too many requests")]
    RateLimited,

    /// Malformed request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Insufficient credits for the operation.
    #[error("insufficient credit: balance={balance}, required={required}")]
    InsufficientCredit {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// An external call succeeded (or may have) but local bookkeeping does
    /// not reflect it. Needs reconciliation; never retried automatically.
    #[error("upstream inconsistency: {0}")]
    UpstreamInconsistency(String),

    /// The provider rejected the request; nothing was created upstream.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Order is missing or not in a phase that allows the requested transition.
    #[error("order phase error: order {order_id} is not pending")]
    OrderPhase {
        /// The order that was targeted, as referenced by the caller.
        order_id: String,
        /// Its current phase, if the order exists.
        phase: Option<OrderPhase>,
    },

    /// Webhook authenticity check failed.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    /// Referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl BillingError {
    /// Phase conflict for an order that could not be resolved at all.
    pub fn unresolved_order(order_id: impl ToString) -> Self {
        Self::OrderPhase {
            order_id: order_id.to_string(),
            phase: None,
        }
    }

    /// Shorthand for a missing-record error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
