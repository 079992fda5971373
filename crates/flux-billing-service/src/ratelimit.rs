//! Request rate limiting.
//!
//! Generation admission is limited per `generate:<user>_<client address>` key
//! with a sliding window: a request is admitted if fewer than `limit` requests
//! for the same key were admitted in the preceding `window`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A rate limiter keyed by an arbitrary string.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record a hit for `key` and return whether it is admitted.
    async fn admit(&self, key: &str) -> bool;
}

/// In-process sliding-window limiter.
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<Windows>,
}

struct Windows {
    hits: HashMap<String, VecDeque<Instant>>,
    last_pruned: Instant,
}

impl Windows {
    /// Drop keys whose windows have fully expired, at most once per `window`.
    fn prune(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_pruned) < window {
            return;
        }
        self.hits.retain(|_, times| {
            times
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
        self.last_pruned = now;
    }
}

impl SlidingWindowLimiter {
    /// Admit at most `limit` requests per key within any `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(Windows {
                hits: HashMap::new(),
                last_pruned: Instant::now(),
            }),
        }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.hits.len()
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn admit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.prune(now, self.window);

        let times = windows.hits.entry(key.to_string()).or_default();
        while times
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            times.pop_front();
        }

        if times.len() >= self.limit {
            tracing::debug!(key, hits = times.len(), "Rate limit exceeded");
            return false;
        }
        times.push_back(now);
        true
    }
}

/// The rate-limit key for a generation request.
#[must_use]
pub fn generation_key(user_id: &str, client_addr: &str) -> String {
    format!("generate:{user_id}_{client_addr}")
}
