//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Deployment environment. Only `production` changes behavior: HTTPS-only
/// webhook targets, redacted internal errors, mandatory HMAC secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: Option<String>,

    /// Store connection pool size
    pub db_pool_size: u32,

    /// HTTP server bind address (HOST:PORT)
    pub http_addr: SocketAddr,

    /// How often the scheduler worker polls for due tasks
    pub poll_interval: Duration,

    /// Maximum due tasks fetched per poll
    pub batch_size: i64,

    /// Lease age after which the reaper frees a lock
    pub lock_timeout: Duration,

    /// Per-session cap on active + paused tasks
    pub max_active_tasks: i64,

    /// Byte cap on serialized task payloads
    pub max_payload_size: usize,

    /// Outbound webhook request timeout
    pub webhook_timeout: Duration,

    /// Default retry budget for new tasks
    pub webhook_max_retries: i32,

    /// Secret for signing outbound webhook envelopes
    pub hmac_secret: String,

    /// Optional webhook domain allowlist; empty means any public host
    pub allowed_webhook_domains: Vec<String>,

    pub environment: Environment,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let environment = match std::env::var("TEMPO_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };

        let database_url = std::env::var("DATABASE_URL").ok();

        let db_pool_size: u32 = std::env::var("DB_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);
        let http_addr: SocketAddr = format!("{host}:{port}").parse()?;

        let poll_interval = Duration::from_secs(
            std::env::var("SCHEDULER_POLL_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        );

        let batch_size: i64 = std::env::var("SCHEDULER_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);

        let lock_timeout = Duration::from_secs(
            std::env::var("SCHEDULER_LOCK_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        );

        let max_active_tasks: i64 = std::env::var("MAX_ACTIVE_TASKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let max_payload_size: usize = std::env::var("MAX_PAYLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(65536);

        let webhook_timeout = Duration::from_secs(
            std::env::var("WEBHOOK_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        );

        let webhook_max_retries: i32 = std::env::var("WEBHOOK_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);

        let hmac_secret = match std::env::var("HMAC_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ if environment.is_production() => {
                anyhow::bail!("HMAC_SECRET must be set in production")
            }
            _ => {
                // Dev fallback: per-process random secret so signing still works.
                use rand::Rng;
                rand::thread_rng()
                    .sample_iter(&rand::distributions::Alphanumeric)
                    .take(32)
                    .map(char::from)
                    .collect()
            }
        };

        let allowed_webhook_domains: Vec<String> = std::env::var("ALLOWED_WEBHOOK_DOMAINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            database_url,
            db_pool_size,
            http_addr,
            poll_interval,
            batch_size,
            lock_timeout,
            max_active_tasks,
            max_payload_size,
            webhook_timeout,
            webhook_max_retries,
            hmac_secret,
            allowed_webhook_domains,
            environment,
        })
    }
}

impl Default for Config {
    /// Compiled-in defaults, used by tests and embedded setups.
    fn default() -> Self {
        Self {
            database_url: None,
            db_pool_size: 10,
            http_addr: "127.0.0.1:8080".parse().expect("static addr"),
            poll_interval: Duration::from_secs(10),
            batch_size: 50,
            lock_timeout: Duration::from_secs(60),
            max_active_tasks: 100,
            max_payload_size: 65536,
            webhook_timeout: Duration::from_secs(30),
            webhook_max_retries: 3,
            hmac_secret: "test-secret".to_string(),
            allowed_webhook_domains: Vec::new(),
            environment: Environment::Development,
        }
    }
}
