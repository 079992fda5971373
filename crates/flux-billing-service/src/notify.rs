//! LogSnag notification client.
//!
//! Notifications are best-effort: they are sent from a spawned task after the
//! ledger has committed, retried a few times with backoff, and a final failure
//! is only logged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

/// Maximum number of delivery attempts.
const NOTIFY_MAX_RETRIES: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const NOTIFY_INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const NOTIFY_MAX_BACKOFF_MS: u64 = 5000;

/// Error type for notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// LogSnag returned an error status.
    #[error("LogSnag API error: {status} - {error}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        error: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// A tracked event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    /// Channel name (e.g. `payments`).
    pub channel: String,
    /// Event name.
    pub event: String,
    /// User the event concerns.
    pub user_id: String,
    /// Free-form description.
    pub description: String,
    /// Emoji icon.
    pub icon: String,
    /// Searchable tags.
    pub tags: BTreeMap<String, serde_json::Value>,
}

impl LogEvent {
    /// The "Successful Payment" event for a settled order.
    #[must_use]
    pub fn successful_payment(user_id: &str, title: &str, amount: i64) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("title".to_string(), serde_json::Value::from(title));
        tags.insert("amount".to_string(), serde_json::Value::from(amount));
        Self {
            channel: "payments".into(),
            event: "Successful Payment".into(),
            user_id: user_id.into(),
            description: format!("{title} - {amount}"),
            icon: "💰".into(),
            tags,
        }
    }
}

#[derive(Serialize)]
struct TrackRequest<'a> {
    project: &'a str,
    #[serde(flatten)]
    event: &'a LogEvent,
}

/// LogSnag API client.
#[derive(Debug, Clone)]
pub struct LogSnagClient {
    client: Client,
    base_url: String,
    token: String,
    project: String,
}

impl LogSnagClient {
    /// Create a new client.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        project: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            project: project.into(),
        })
    }

    /// Publish one event.
    pub async fn track(&self, event: &LogEvent) -> Result<(), NotifyError> {
        let url = format!("{}/v1/log", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&TrackRequest {
                project: &self.project,
                event,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {status}"));
        Err(NotifyError::Api {
            status: status.as_u16(),
            error,
        })
    }

    /// Publish with exponential-backoff retries.
    pub async fn track_with_retry(&self, event: &LogEvent) -> Result<(), NotifyError> {
        let mut attempt = 0;
        let mut backoff_ms = NOTIFY_INITIAL_BACKOFF_MS;

        loop {
            match self.track(event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;

                    if attempt >= NOTIFY_MAX_RETRIES {
                        tracing::warn!(
                            event = %event.event,
                            attempt = %attempt,
                            error = %e,
                            "Notification failed after max retries"
                        );
                        return Err(e);
                    }

                    tracing::debug!(
                        event = %event.event,
                        attempt = %attempt,
                        backoff_ms = %backoff_ms,
                        error = %e,
                        "Notification failed, retrying"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(NOTIFY_MAX_BACKOFF_MS);
                }
            }
        }
    }
}

/// Send `event` from a background task if a notifier is configured.
pub fn spawn_notification(notifier: Option<&Arc<LogSnagClient>>, event: LogEvent) {
    let Some(notifier) = notifier else {
        return;
    };
    let notifier = notifier.clone();

    tokio::spawn(async move {
        if let Err(e) = notifier.track_with_retry(&event).await {
            tracing::error!(
                event = %event.event,
                user_id = %event.user_id,
                error = %e,
                "Failed to deliver notification after all retries"
            );
        }
    });
}
