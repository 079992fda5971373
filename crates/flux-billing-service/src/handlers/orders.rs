//! Charge order handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::parse_json;
use crate::auth::AuthUser;
use crate::engine;
use crate::error::ApiError;
use crate::state::AppState;

/// Create order request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Charge product token.
    pub charge_product_id: String,
}

/// Created order. The token fields go into the checkout's payment metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    /// Charge order token.
    pub order_id: String,
    /// Charge product token.
    pub charge_product_id: String,
    /// Purchasing user.
    pub user_id: String,
    /// Price in the currency's minor unit.
    pub amount: i64,
    /// Credits granted on payment.
    pub credit: i64,
    /// ISO currency code.
    pub currency: String,
}

/// Create a pending charge order.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    body: Bytes,
) -> Result<Json<OrderResponse>, ApiError> {
    let body: CreateOrderRequest = parse_json(&body)?;
    let created = engine::create_order(&state, &auth.user_id, &body.charge_product_id).await?;

    Ok(Json(OrderResponse {
        order_id: created.order_id,
        charge_product_id: created.charge_product_id,
        user_id: created.user_id.to_string(),
        amount: created.amount,
        credit: created.credit,
        currency: created.currency,
    }))
}
