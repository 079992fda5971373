//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, generate, health, orders, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent generation requests.
/// Each one holds an outbound provider call open.
const GENERATE_MAX_CONCURRENT_REQUESTS: usize = 32;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Generation (JWT auth, rate-limited per user and address)
/// - `POST /api/generate` - Admit and bill a generation
///
/// ## Orders and credits (JWT auth)
/// - `POST /api/orders` - Create a pending charge order
/// - `GET /api/credits` - Balance and ledger history
///
/// ## Webhooks (signature verification)
/// - `GET /api/webhooks/stripe` - Endpoint probe
/// - `POST /api/webhooks/stripe` - Stripe payment events
pub fn create_router(state: AppState) -> Router {
    create_router_with_state(Arc::new(state))
}

/// [`create_router`] for state that is already shared, e.g. with the
/// reconciliation task.
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let timeout = TimeoutLayer::new(Duration::from_secs(request_timeout_seconds));

    let api_routes = Router::new()
        .route("/orders", post(orders::create_order))
        .route("/credits", get(credits::get_credits))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Webhooks (no concurrency limit - controlled by the processor)
        .route(
            "/webhooks/stripe",
            get(webhooks::stripe_webhook_probe).post(webhooks::stripe_webhook),
        )
        .layer(timeout.clone())
        // Generation is bounded by the provider timeout, not the request timeout
        .route(
            "/generate",
            post(generate::generate)
                .layer(ConcurrencyLimitLayer::new(GENERATE_MAX_CONCURRENT_REQUESTS)),
        );

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .layer(timeout)
        .nest("/api", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
