//! Flux-Billing Service - credit ledger and charge orders for image generation
//!
//! This is the main entry point for the flux-billing service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flux_billing_service::catalog::{load_catalog, seed_catalog};
use flux_billing_service::reconcile::spawn_reconciler;
use flux_billing_service::{create_router_with_state, AppState, ServiceConfig};
use flux_billing_store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flux_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Flux-Billing Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        provider_url = %config.provider_base_url,
        provider_configured = %config.provider_api_token.is_some(),
        stripe_configured = %config.stripe_webhook_secret.is_some(),
        logsnag_configured = %config.logsnag_token.is_some(),
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using in-memory store, data will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(path) = config.catalog_path.as_deref() {
        tracing::info!(path = %path, "Loading charge product catalog");
        let products = load_catalog(path)?;
        seed_catalog(store.as_ref(), &products).await?;
    } else {
        tracing::warn!("CATALOG_PATH not set - no charge products available");
    }

    // Build app state
    let state = Arc::new(AppState::new(store, config.clone()));

    let _reconciler = spawn_reconciler(state.clone());

    // Create the router
    let app = create_router_with_state(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
