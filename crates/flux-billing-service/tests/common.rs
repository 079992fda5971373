//! Common test utilities for flux-billing integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use flux_billing_core::{
    ChargeProduct, GenerationRequest, LedgerEntryType, NewGenerationJob, ProductId, UserId,
};
use flux_billing_service::auth::JwtClaims;
use flux_billing_service::stripe::signature_header;
use flux_billing_service::{
    create_router_with_state, AppState, GenerationProvider, ProviderError, ServiceConfig,
};
use flux_billing_store::{MemoryStore, Store};

/// HS256 secret the harness signs bearer tokens with.
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Stripe endpoint signing secret.
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// How the fake provider answers job creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /// Create the job and write its local record.
    Ok,
    /// Report success without writing a local record.
    NoRecord,
    /// Reject the request.
    Reject,
    /// Time out after sending.
    Timeout,
    /// Create the job and write its local record, then take this long to answer.
    Slow(Duration),
}

/// In-process generation provider.
pub struct FakeProvider {
    store: Arc<MemoryStore>,
    mode: ProviderMode,
    next_ref: AtomicU64,
    calls: AtomicUsize,
}

impl FakeProvider {
    /// Number of job creation calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    async fn create_job(
        &self,
        user_id: &UserId,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let provider_ref = format!("rep_{}", self.next_ref.fetch_add(1, Ordering::SeqCst) + 1);

        match self.mode {
            ProviderMode::Ok | ProviderMode::Slow(_) => {
                self.store
                    .insert_generation_job(NewGenerationJob {
                        provider_ref: provider_ref.clone(),
                        user_id: user_id.clone(),
                        request: request.clone(),
                    })
                    .await
                    .map_err(|e| ProviderError::Rejected {
                        status: 500,
                        message: e.to_string(),
                    })?;
                if let ProviderMode::Slow(delay) = self.mode {
                    tokio::time::sleep(delay).await;
                }
                Ok(provider_ref)
            }
            ProviderMode::NoRecord => Ok(provider_ref),
            ProviderMode::Reject => Err(ProviderError::Rejected {
                status: 422,
                message: "prompt rejected".into(),
            }),
            ProviderMode::Timeout => Err(ProviderError::UnknownOutcome(
                "operation timed out".into(),
            )),
        }
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for funding accounts and inspecting results.
    pub store: Arc<MemoryStore>,
    /// Shared application state (codecs, config).
    pub state: Arc<AppState>,
    /// The fake generation provider.
    pub provider: Arc<FakeProvider>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

/// Configuration with auth and webhook secrets set.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        jwt_secret: Some(JWT_SECRET.into()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        reconcile_interval_seconds: 0,
        ..ServiceConfig::default()
    }
}

impl TestHarness {
    /// Create a new test harness with a fresh store and a working provider.
    pub fn new() -> Self {
        Self::with_mode(ProviderMode::Ok)
    }

    /// Create a harness whose provider behaves as `mode`.
    pub fn with_mode(mode: ProviderMode) -> Self {
        Self::build(mode, test_config())
    }

    /// Create a harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::build(ProviderMode::Ok, config)
    }

    /// Create a harness and adjust its state (notifier, rate limiter) before
    /// the router is built.
    pub fn customized(
        mode: ProviderMode,
        config: ServiceConfig,
        customize: impl FnOnce(AppState) -> AppState,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FakeProvider {
            store: store.clone(),
            mode,
            next_ref: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        });

        let state = AppState::new(store.clone(), config).with_provider(provider.clone());
        let state = Arc::new(customize(state));
        let router = create_router_with_state(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            state,
            provider,
            test_user_id: "user_test".parse().expect("valid user id"),
        }
    }

    fn build(mode: ProviderMode, config: ServiceConfig) -> Self {
        Self::customized(mode, config, |state| state)
    }

    /// Get the authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(self.test_user_id.as_str())
    }

    /// Get the authorization header for an arbitrary user.
    pub fn auth_header_for(user_id: &str) -> String {
        let claims = JwtClaims {
            sub: user_id.into(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: Some(chrono::Utc::now().timestamp()),
            aud: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Give `user_id` `credits` through a charge ledger entry.
    pub async fn fund(&self, user_id: &UserId, credits: i64) {
        let account = self
            .store
            .get_or_create_account(user_id)
            .await
            .expect("Failed to provision account");
        self.store
            .adjust(account.id, credits, LedgerEntryType::Charge)
            .await
            .expect("Failed to fund account");
    }

    /// Current balance of `user_id` (0 if unprovisioned).
    pub async fn balance(&self, user_id: &UserId) -> i64 {
        self.store
            .get_account(user_id)
            .await
            .expect("Failed to read account")
            .map_or(0, |a| a.credit)
    }

    /// Seed a catalog product and return its token.
    pub async fn seed_product(&self, id: i64, credit: i64, amount: i64) -> String {
        let product = ChargeProduct {
            id: ProductId::new(id),
            credit,
            title: format!("{credit} credits"),
            amount,
            currency: "usd".into(),
        };
        self.store
            .upsert_charge_product(&product)
            .await
            .expect("Failed to seed product");
        self.state.codecs.encode_product(product.id)
    }

    /// Create an order for the test user through the API and return its token.
    pub async fn create_order(&self, product_token: &str) -> String {
        let response = self
            .server
            .post("/api/orders")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({ "chargeProductId": product_token }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["orderId"]
            .as_str()
            .expect("orderId in response")
            .to_string()
    }

    /// A `Stripe-Signature` header for `payload` signed now.
    pub fn sign(payload: &str) -> String {
        signature_header(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp())
            .expect("Failed to sign payload")
    }

    /// Post a signed webhook.
    pub async fn post_webhook(&self, payload: &str) -> axum_test::TestResponse {
        self.server
            .post("/api/webhooks/stripe")
            .add_header("stripe-signature", Self::sign(payload))
            .text(payload.to_string())
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A payment intent event body.
pub fn payment_event(event_type: &str, metadata: serde_json::Value) -> String {
    json!({
        "id": format!("evt_{}", event_type.replace('.', "_")),
        "type": event_type,
        "created": chrono::Utc::now().timestamp(),
        "data": {
            "object": {
                "id": "pi_test",
                "object": "payment_intent",
                "amount": 990,
                "metadata": metadata,
            }
        }
    })
    .to_string()
}
