//! Relay configuration loaded from environment variables.

use chrono::Duration;

/// Relay configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — Postgres connection string (required)
/// - `POLL_INTERVAL_MS` — delay between relay cycles (default: `500`)
/// - `BATCH_SIZE` — max entries fetched per cycle (default: `50`)
/// - `MAX_RETRIES` — failed-entry retry budget (default: `3`)
/// - `CLAIM_TIMEOUT_SECS` — age at which a claim counts as abandoned (default: `60`)
/// - `RETENTION_HOURS` — how long processed entries are kept (default: `24`)
/// - `SWEEP_INTERVAL_SECS` — delay between sweeper passes (default: `30`)
/// - `MAX_CONNECTIONS` — database pool size (default: `10`)
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub poll_interval: std::time::Duration,
    pub batch_size: i64,
    pub max_retries: i32,
    pub claim_timeout: Duration,
    pub retention: Duration,
    pub sweep_interval: std::time::Duration,
    pub max_connections: u32,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl RelayConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults. Fails when `DATABASE_URL` is missing.
    pub fn from_env() -> Result<Self, std::env::VarError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")?,
            poll_interval: std::time::Duration::from_millis(env_parsed("POLL_INTERVAL_MS", 500)),
            batch_size: env_parsed("BATCH_SIZE", 50),
            max_retries: env_parsed("MAX_RETRIES", 3),
            claim_timeout: Duration::seconds(env_parsed("CLAIM_TIMEOUT_SECS", 60)),
            retention: Duration::hours(env_parsed("RETENTION_HOURS", 24)),
            sweep_interval: std::time::Duration::from_secs(env_parsed("SWEEP_INTERVAL_SECS", 30)),
            max_connections: env_parsed("MAX_CONNECTIONS", 10),
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            poll_interval: std::time::Duration::from_millis(500),
            batch_size: 50,
            max_retries: 3,
            claim_timeout: Duration::seconds(60),
            retention: Duration::hours(24),
            sweep_interval: std::time::Duration::from_secs(30),
            max_connections: 10,
        }
    }
}
