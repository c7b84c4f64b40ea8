//! Fixed-window rate limiting for the tool API.
//!
//! One budget per source key (client IP); the key is never derived from
//! anything the client can choose, so one host cannot partition its budget
//! by session id. State is process-local. The owning facade starts the
//! sweep task and stops it on shutdown so tests never leak timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

/// Configuration for the request rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Fixed window length.
    pub window: Duration,
    /// Requests allowed per window.
    pub max_requests: u32,
    /// How often expired windows are swept out.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { limit: u32, remaining: u32 },
    Denied { limit: u32, retry_after_secs: i64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

struct WindowRecord {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window counter keyed by source.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, WindowRecord>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn window_len(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.window)
            .unwrap_or_else(|_| chrono::Duration::seconds(900))
    }

    /// Check and count one request from `key`.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> Decision {
        let limit = self.config.max_requests;
        let window = self.window_len();
        let mut windows = self.windows.lock().expect("rate limiter poisoned");

        let record = windows.entry(key.to_string()).or_insert(WindowRecord {
            started_at: now,
            count: 0,
        });

        if now - record.started_at >= window {
            // Window expired: start fresh.
            record.started_at = now;
            record.count = 0;
        }

        if record.count >= limit {
            let retry_after_secs = (record.started_at + window - now).num_seconds().max(1);
            return Decision::Denied {
                limit,
                retry_after_secs,
            };
        }

        record.count += 1;
        Decision::Allowed {
            limit,
            remaining: limit - record.count,
        }
    }

    /// Drop windows that expired before `now`. Returns how many were
    /// removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let window = self.window_len();
        let mut windows = self.windows.lock().expect("rate limiter poisoned");
        let before = windows.len();
        windows.retain(|_, record| now - record.started_at < window);
        before - windows.len()
    }
}

/// Spawn the periodic sweep task. The caller keeps the sender and flips it
/// to stop the task.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("rate limiter sweeper shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(limiter.config.sweep_interval) => {
                    let removed = limiter.sweep(Utc::now());
                    if removed > 0 {
                        debug!(removed, "swept expired rate-limit windows");
                    }
                }
            }
        }
    });
    (handle, shutdown_tx)
}
