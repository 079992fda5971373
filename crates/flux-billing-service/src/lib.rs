//! Flux-Billing HTTP API Service.
//!
//! This crate provides the HTTP API for the credit ledger:
//!
//! - Generation admission (rate limit, funds check, provider call, debit)
//! - Charge orders for purchasable credit packs
//! - Credit balance and ledger history
//! - Stripe payment webhooks
//!
//! # Authentication
//!
//! End-user requests carry an HS256 JWT bearer token issued by the identity
//! provider; the `sub` claim is the user id. Webhooks are authenticated by the
//! `Stripe-Signature` header instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for the router

pub mod auth;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod provider;
pub mod ratelimit;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use dispatch::WebhookDispatcher;
pub use error::ApiError;
pub use notify::{LogSnagClient, NotifyError};
pub use provider::{FluxClient, GenerationProvider, ProviderError};
pub use ratelimit::{RateLimiter, SlidingWindowLimiter};
pub use routes::{create_router, create_router_with_state};
pub use state::AppState;
