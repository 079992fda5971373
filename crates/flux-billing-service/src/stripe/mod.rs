//! Stripe webhook integration.
//!
//! Only the inbound side is handled here: signature verification of the
//! `Stripe-Signature` header and the event envelope. Checkout itself happens
//! on the processor.

pub mod signature;
pub mod types;

pub use signature::{signature_header, verify_signature, SignatureError};
pub use types::{PaymentMetadata, StripeEvent, StripeEventData};
