//! Charge order creation and non-crediting transitions.

use flux_billing_core::{BillingError, NewChargeOrder, OrderTransition, UserId};
use flux_billing_store::StoreError;

use crate::state::AppState;
use crate::stripe::StripeEvent;

/// Tokens for a freshly created order, to be attached to the checkout as
/// payment metadata.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    /// Charge order token.
    pub order_id: String,
    /// Charge product token.
    pub charge_product_id: String,
    /// Purchasing user.
    pub user_id: UserId,
    /// Price in the currency's minor unit.
    pub amount: i64,
    /// Credits granted on payment.
    pub credit: i64,
    /// ISO currency code.
    pub currency: String,
}

/// Create a `Pending` order for the product behind `product_token`.
pub async fn create_order(
    state: &AppState,
    user_id: &UserId,
    product_token: &str,
) -> Result<CreatedOrder, BillingError> {
    let product_id = state
        .codecs
        .decode_product(product_token)
        .ok_or_else(|| BillingError::Validation("invalid charge product id".into()))?;

    let product = state
        .store
        .get_charge_product(product_id)
        .await?
        .ok_or_else(|| BillingError::not_found("charge product", product_token))?;

    let order = state
        .store
        .create_charge_order(NewChargeOrder {
            user_id: user_id.clone(),
            product_id: product.id,
            amount: product.amount,
        })
        .await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %user_id,
        product_id = %product.id,
        amount = product.amount,
        "Charge order created"
    );

    Ok(CreatedOrder {
        order_id: state.codecs.encode_order(order.id),
        charge_product_id: state.codecs.encode_product(product.id),
        user_id: order.user_id,
        amount: order.amount,
        credit: product.credit,
        currency: product.currency,
    })
}

/// Apply a failed or canceled payment to the order named in the event
/// metadata.
pub async fn resolve_order(
    state: &AppState,
    event: &StripeEvent,
    transition: OrderTransition,
) -> Result<(), BillingError> {
    let metadata = event.metadata();
    let order_token = metadata.order_id.as_deref().unwrap_or_default();

    let order_id = state
        .codecs
        .decode_order(order_token)
        .ok_or_else(|| BillingError::unresolved_order(order_token))?;

    let order = state
        .store
        .transition_order(order_id, transition, &event.data.object)
        .await
        .map_err(|e| match e {
            StoreError::NotFound { .. } => BillingError::unresolved_order(order_token),
            StoreError::OrderPhase { phase, .. } => {
                tracing::info!(order_id = %order_id, phase = %phase, ?transition, "Order transition rejected");
                BillingError::OrderPhase {
                    order_id: order_token.to_string(),
                    phase: Some(phase),
                }
            }
            other => BillingError::from(other),
        })?;

    tracing::info!(
        order_id = %order.id,
        user_id = %order.user_id,
        event_id = %event.id,
        phase = %order.phase,
        "Charge order updated"
    );

    Ok(())
}
