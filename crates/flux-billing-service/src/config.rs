//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use flux_billing_core::CostTable;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. When unset the in-memory store is used.
    pub database_url: Option<String>,

    /// Maximum pool connections (default: 10).
    pub database_max_connections: u32,

    /// HS256 secret used to validate bearer tokens.
    pub jwt_secret: Option<String>,

    /// Expected JWT audience, if any.
    pub jwt_audience: Option<String>,

    /// Salt for the opaque id codecs (default: "flux-billing").
    pub id_salt: String,

    /// Stripe webhook signing secret.
    pub stripe_webhook_secret: Option<String>,

    /// Maximum accepted age of a signed webhook, in seconds (default: 300).
    pub stripe_signature_tolerance_seconds: u64,

    /// Generation provider base URL.
    pub provider_base_url: String,

    /// Generation provider API token.
    pub provider_api_token: Option<String>,

    /// Generation provider request timeout in seconds (default: 60).
    pub provider_timeout_seconds: u64,

    /// LogSnag API base URL.
    pub logsnag_base_url: String,

    /// LogSnag API token (optional).
    pub logsnag_token: Option<String>,

    /// LogSnag project name.
    pub logsnag_project: String,

    /// Path to the charge product catalog JSON file.
    pub catalog_path: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Generation requests allowed per window (default: 10).
    pub rate_limit_requests: usize,

    /// Rate limit window in seconds (default: 10).
    pub rate_limit_window_seconds: u64,

    /// Interval between unbilled-job sweeps in seconds; 0 disables (default: 300).
    pub reconcile_interval_seconds: u64,

    /// Minimum job age before a missing billing row is reported (default: 600).
    pub reconcile_grace_seconds: u64,

    /// Credits per generation by model.
    pub costs: CostTable,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    webhook_secret: String,
}

/// Generation provider secrets file structure.
#[derive(Debug, Deserialize)]
struct ProviderSecrets {
    #[serde(default)]
    api_url: Option<String>,
    api_token: String,
}

/// LogSnag secrets file structure.
#[derive(Debug, Deserialize)]
struct LogSnagSecrets {
    token: String,
    #[serde(default)]
    project: Option<String>,
}

/// Auth secrets file structure.
#[derive(Debug, Deserialize)]
struct AuthSecrets {
    jwt_secret: String,
}

const DEFAULT_PROVIDER_URL: &str = "https://api.noobdriver.com";
const DEFAULT_LOGSNAG_URL: &str = "https://api.logsnag.com";
const DEFAULT_LOGSNAG_PROJECT: &str = "flux";

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stripe_webhook_secret = load_secrets::<StripeSecrets>("stripe")
            .map(|s| s.webhook_secret)
            .or_else(|| env_opt("STRIPE_WEBHOOK_SECRET"));

        let (provider_base_url, provider_api_token) = match load_secrets::<ProviderSecrets>("flux")
        {
            Some(secrets) => (
                secrets
                    .api_url
                    .unwrap_or_else(|| env_or("FLUX_API_URL", DEFAULT_PROVIDER_URL)),
                Some(secrets.api_token),
            ),
            None => (
                env_or("FLUX_API_URL", DEFAULT_PROVIDER_URL),
                env_opt("FLUX_API_TOKEN"),
            ),
        };

        let (logsnag_token, logsnag_project) = match load_secrets::<LogSnagSecrets>("logsnag") {
            Some(secrets) => (
                Some(secrets.token),
                secrets
                    .project
                    .unwrap_or_else(|| env_or("LOGSNAG_PROJECT", DEFAULT_LOGSNAG_PROJECT)),
            ),
            None => (
                env_opt("LOGSNAG_TOKEN"),
                env_or("LOGSNAG_PROJECT", DEFAULT_LOGSNAG_PROJECT),
            ),
        };

        let jwt_secret = load_secrets::<AuthSecrets>("auth")
            .map(|s| s.jwt_secret)
            .or_else(|| env_opt("JWT_SECRET"));

        Self {
            listen_addr: env_or("LISTEN_ADDR", &defaults.listen_addr),
            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            jwt_secret,
            jwt_audience: env_opt("JWT_AUDIENCE"),
            id_salt: env_or("ID_SALT", &defaults.id_salt),
            stripe_webhook_secret,
            stripe_signature_tolerance_seconds: env_parse(
                "STRIPE_SIGNATURE_TOLERANCE_SECONDS",
                defaults.stripe_signature_tolerance_seconds,
            ),
            provider_base_url,
            provider_api_token,
            provider_timeout_seconds: env_parse(
                "FLUX_TIMEOUT_SECONDS",
                defaults.provider_timeout_seconds,
            ),
            logsnag_base_url: env_or("LOGSNAG_API_URL", DEFAULT_LOGSNAG_URL),
            logsnag_token,
            logsnag_project,
            catalog_path: env_opt("CATALOG_PATH"),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            rate_limit_requests: env_parse("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests),
            rate_limit_window_seconds: env_parse(
                "RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window_seconds,
            ),
            reconcile_interval_seconds: env_parse(
                "RECONCILE_INTERVAL_SECONDS",
                defaults.reconcile_interval_seconds,
            ),
            reconcile_grace_seconds: env_parse(
                "RECONCILE_GRACE_SECONDS",
                defaults.reconcile_grace_seconds,
            ),
            costs: CostTable::default(),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load `<name>.json` from the first secrets directory that has it.
fn load_secrets<T: serde::de::DeserializeOwned>(name: &str) -> Option<T> {
    let secret_paths = [
        format!(".secrets/{name}.json"),
        format!("flux-billing/.secrets/{name}.json"),
        format!("../.secrets/{name}.json"),
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<T>(path) {
            tracing::info!(path = %path, "Loaded secrets from file");
            return Some(secrets);
        }
    }

    tracing::debug!(name, "Secrets file not found, using environment variables");
    None
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            jwt_secret: None,
            jwt_audience: None,
            id_salt: "flux-billing".into(),
            stripe_webhook_secret: None,
            stripe_signature_tolerance_seconds: 300,
            provider_base_url: DEFAULT_PROVIDER_URL.into(),
            provider_api_token: None,
            provider_timeout_seconds: 60,
            logsnag_base_url: DEFAULT_LOGSNAG_URL.into(),
            logsnag_token: None,
            logsnag_project: DEFAULT_LOGSNAG_PROJECT.into(),
            catalog_path: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            rate_limit_requests: 10,
            rate_limit_window_seconds: 10,
            reconcile_interval_seconds: 300,
            reconcile_grace_seconds: 600,
            costs: CostTable::default(),
        }
    }
}
