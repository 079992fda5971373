//! Payment settlement.

use flux_billing_core::{BillingError, OrderId};
use flux_billing_store::StoreError;

use crate::notify::{spawn_notification, LogEvent};
use crate::state::AppState;
use crate::stripe::StripeEvent;

/// Settle the order referenced by a `payment_intent.succeeded` event: mark it
/// `Paid` and credit its owner with the product's credits.
///
/// Missing or undecodable references, and orders that are no longer
/// `Pending`, are phase errors and change nothing.
pub async fn settle_payment(state: &AppState, event: &StripeEvent) -> Result<(), BillingError> {
    let metadata = event.metadata();
    let order_token = metadata.order_id.as_deref().unwrap_or_default();
    let product_token = metadata.charge_product_id.as_deref().unwrap_or_default();

    let order_id = state
        .codecs
        .decode_order(order_token)
        .ok_or_else(|| BillingError::unresolved_order(order_token))?;

    let product = match state.codecs.decode_product(product_token) {
        Some(product_id) => state.store.get_charge_product(product_id).await?,
        None => None,
    }
    .ok_or_else(|| {
        tracing::warn!(
            order_id = %order_id,
            charge_product_id = %product_token,
            "Payment references unknown charge product"
        );
        BillingError::unresolved_order(order_token)
    })?;

    let receipt = state
        .store
        .settle_paid_order(order_id, &product, &event.data.object)
        .await
        .map_err(|e| settle_error(order_id, order_token, e))?;

    if let Some(claimed) = metadata.user_id.as_deref() {
        if claimed != receipt.order.user_id.as_str() {
            tracing::warn!(
                order_id = %order_id,
                owner = %receipt.order.user_id,
                metadata_user_id = %claimed,
                "Payment metadata user does not match order owner; credited the owner"
            );
        }
    }

    tracing::info!(
        order_id = %order_id,
        user_id = %receipt.order.user_id,
        event_id = %event.id,
        credits = product.credit,
        balance = receipt.account.credit,
        "Charge order paid"
    );

    spawn_notification(
        state.notifier.as_ref(),
        LogEvent::successful_payment(
            receipt.order.user_id.as_str(),
            &product.title,
            product.amount,
        ),
    );

    Ok(())
}

fn settle_error(order_id: OrderId, order_token: &str, err: StoreError) -> BillingError {
    match err {
        StoreError::NotFound { .. } => BillingError::unresolved_order(order_token),
        StoreError::OrderPhase { phase, .. } => {
            tracing::info!(order_id = %order_id, phase = %phase, "Payment for non-pending order rejected");
            BillingError::OrderPhase {
                order_id: order_token.to_string(),
                phase: Some(phase),
            }
        }
        other => BillingError::from(other),
    }
}
