//! Payment event dispatch.
//!
//! Events are routed by their `type` string to a registered handler. Types
//! with no handler are acknowledged and ignored.

use std::collections::HashMap;

use futures::future::BoxFuture;

use flux_billing_core::{BillingError, OrderTransition};

use crate::engine;
use crate::state::AppState;
use crate::stripe::StripeEvent;

/// `payment_intent.succeeded`
pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
/// `payment_intent.payment_failed`
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
/// `payment_intent.canceled`
pub const PAYMENT_CANCELED: &str = "payment_intent.canceled";

/// Future returned by an event handler.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), BillingError>>;

/// An event handler.
pub type EventHandler = for<'a> fn(&'a AppState, &'a StripeEvent) -> HandlerFuture<'a>;

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran to completion.
    Handled,
    /// No handler is registered for the event type.
    Ignored,
}

/// Routes payment events to handlers.
#[derive(Default)]
pub struct WebhookDispatcher {
    handlers: HashMap<&'static str, EventHandler>,
}

impl WebhookDispatcher {
    /// An empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The dispatcher for the payment intent lifecycle.
    #[must_use]
    pub fn stripe() -> Self {
        Self::new()
            .register(PAYMENT_SUCCEEDED, payment_succeeded)
            .register(PAYMENT_FAILED, payment_failed)
            .register(PAYMENT_CANCELED, payment_canceled)
    }

    /// Register `handler` for `event_type`, replacing any previous one.
    #[must_use]
    pub fn register(mut self, event_type: &'static str, handler: EventHandler) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    /// Whether a handler exists for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Run the handler registered for `event.event_type`.
    pub async fn dispatch(
        &self,
        state: &AppState,
        event: &StripeEvent,
    ) -> Result<Dispatch, BillingError> {
        let Some(handler) = self.handlers.get(event.event_type.as_str()) else {
            tracing::debug!(event_type = %event.event_type, event_id = %event.id, "Unhandled payment event");
            return Ok(Dispatch::Ignored);
        };

        handler(state, event).await?;
        Ok(Dispatch::Handled)
    }
}

fn payment_succeeded<'a>(state: &'a AppState, event: &'a StripeEvent) -> HandlerFuture<'a> {
    Box::pin(engine::settle_payment(state, event))
}

fn payment_failed<'a>(state: &'a AppState, event: &'a StripeEvent) -> HandlerFuture<'a> {
    Box::pin(engine::resolve_order(state, event, OrderTransition::Fail))
}

fn payment_canceled<'a>(state: &'a AppState, event: &'a StripeEvent) -> HandlerFuture<'a> {
    Box::pin(engine::resolve_order(state, event, OrderTransition::Cancel))
}
