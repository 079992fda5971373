//! Stripe webhook types.

use serde::Deserialize;

/// Stripe event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    /// Event ID.
    pub id: String,
    /// Event type, e.g. `payment_intent.succeeded`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: Option<i64>,
    /// Event data.
    pub data: StripeEventData,
}

/// Stripe event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    /// The object the event is about (a `PaymentIntent` for the events we handle).
    pub object: serde_json::Value,
}

impl StripeEvent {
    /// Metadata attached to the event object at checkout.
    #[must_use]
    pub fn metadata(&self) -> PaymentMetadata {
        self.data
            .object
            .get("metadata")
            .cloned()
            .and_then(|m| serde_json::from_value(m).ok())
            .unwrap_or_default()
    }

    /// The event object's own id (`pi_...`), if present.
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }
}

/// Order references the checkout attached to the payment intent.
///
/// All values are opaque tokens or identity-provider ids as issued by
/// `POST /api/orders`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    /// Charge order token.
    #[serde(default)]
    pub order_id: Option<String>,
    /// Charge product token.
    #[serde(default)]
    pub charge_product_id: Option<String>,
    /// Purchasing user id.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_payment_intent_event() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1_700_000_000,
            "data": {"object": {
                "id": "pi_1",
                "object": "payment_intent",
                "metadata": {"orderId": "ord", "chargeProductId": "prod", "userId": "user_a"}
            }}
        }))
        .unwrap();

        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(event.object_id(), Some("pi_1"));
        let metadata = event.metadata();
        assert_eq!(metadata.order_id.as_deref(), Some("ord"));
        assert_eq!(metadata.charge_product_id.as_deref(), Some("prod"));
        assert_eq!(metadata.user_id.as_deref(), Some("user_a"));
    }

    #[test]
    fn missing_metadata_is_empty() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_2",
            "type": "payment_intent.canceled",
            "data": {"object": {"id": "pi_2"}}
        }))
        .unwrap();
        assert_eq!(event.metadata(), PaymentMetadata::default());
    }
}
