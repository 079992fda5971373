//! Payment processor webhook handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use flux_billing_core::BillingError;

use crate::dispatch::Dispatch;
use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{verify_signature, StripeEvent};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Endpoint probe.
pub async fn stripe_webhook_probe() -> &'static str {
    "OK"
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(secret) = state.config.stripe_webhook_secret.as_deref() else {
        tracing::warn!("Stripe webhook received but no signing secret is configured");
        return Err(
            BillingError::SignatureInvalid("signing secret not configured".into()).into(),
        );
    };

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BillingError::SignatureInvalid("missing Stripe-Signature header".into()))?;

    verify_signature(
        &body,
        signature,
        secret,
        state.config.stripe_signature_tolerance_seconds,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Invalid Stripe webhook signature");
        BillingError::SignatureInvalid(e.to_string())
    })?;

    let event: StripeEvent = serde_json::from_str(&body)
        .map_err(|e| BillingError::Validation(format!("malformed event: {e}")))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        object_id = ?event.object_id(),
        "Received Stripe webhook"
    );

    match state.webhooks.dispatch(&state, &event).await {
        Ok(Dispatch::Handled | Dispatch::Ignored) => Ok(Json(WebhookResponse { received: true })),
        Err(e) => {
            tracing::warn!(
                event_type = %event.event_type,
                event_id = %event.id,
                error = %e,
                "Stripe webhook rejected"
            );
            Err(e.into())
        }
    }
}
