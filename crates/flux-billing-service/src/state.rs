//! Application state.

use std::sync::Arc;
use std::time::Duration;

use flux_billing_core::IdCodecs;
use flux_billing_store::Store;

use crate::config::ServiceConfig;
use crate::dispatch::WebhookDispatcher;
use crate::notify::LogSnagClient;
use crate::provider::{FluxClient, GenerationProvider};
use crate::ratelimit::{RateLimiter, SlidingWindowLimiter};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Opaque id codecs for jobs, orders and products.
    pub codecs: IdCodecs,

    /// Generation admission rate limiter.
    pub rate_limiter: Arc<dyn RateLimiter>,

    /// Generation provider (optional).
    pub provider: Option<Arc<dyn GenerationProvider>>,

    /// LogSnag client for payment notifications (optional).
    pub notifier: Option<Arc<LogSnagClient>>,

    /// Stripe event handlers.
    pub webhooks: Arc<WebhookDispatcher>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let provider = config.provider_api_token.as_ref().and_then(|token| {
            match FluxClient::new(
                &config.provider_base_url,
                token,
                Duration::from_secs(config.provider_timeout_seconds),
            ) {
                Ok(client) => {
                    tracing::info!(provider_url = %config.provider_base_url, "Generation provider enabled");
                    Some(Arc::new(client) as Arc<dyn GenerationProvider>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create generation provider client");
                    None
                }
            }
        });

        if provider.is_none() {
            tracing::warn!("Generation provider not configured - generation requests will fail");
        }

        let notifier = config.logsnag_token.as_ref().and_then(|token| {
            match LogSnagClient::new(&config.logsnag_base_url, token, &config.logsnag_project) {
                Ok(client) => {
                    tracing::info!(project = %config.logsnag_project, "LogSnag notifications enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create LogSnag client");
                    None
                }
            }
        });

        if notifier.is_none() {
            tracing::warn!("LogSnag not configured - payment notifications will not be sent");
        }

        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - all webhooks will be rejected");
        }

        let rate_limiter = Arc::new(SlidingWindowLimiter::new(
            config.rate_limit_requests,
            Duration::from_secs(config.rate_limit_window_seconds),
        ));

        Self {
            store,
            codecs: IdCodecs::new(&config.id_salt),
            config,
            rate_limiter,
            provider,
            notifier,
            webhooks: Arc::new(WebhookDispatcher::stripe()),
        }
    }

    /// Replace the generation provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the notification client.
    #[must_use]
    pub fn with_notifier(mut self, notifier: LogSnagClient) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Replace the rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }
}
