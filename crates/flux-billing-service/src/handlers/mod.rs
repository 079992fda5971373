//! API handlers.

pub mod credits;
pub mod generate;
pub mod health;
pub mod orders;
pub mod webhooks;

use serde::de::DeserializeOwned;

use flux_billing_core::BillingError;

use crate::error::ApiError;

/// Parse a JSON request body, reporting malformed input as a validation error.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| BillingError::Validation(e.to_string()).into())
}
