//! Configuration management for the engine.
//!
//! Loads configuration from environment variables with sensible
//! defaults. Binaries call `dotenvy::dotenv()` before
//! [`Config::from_env`] so a local `.env` file works out of the box.

use chrono::Duration;
use std::env;
use std::time::Duration as StdDuration;

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded wait for a per-stream lock before surfacing contention
    pub lock_wait: StdDuration,
    /// How long an inventory reservation holds units
    pub reservation_ttl: Duration,
    /// How long a pending transfer request stays open
    pub transfer_request_ttl: Duration,
    /// Whether resales need explicit approval
    pub approval_required_for_resale: bool,
    /// Transfers must complete this long before the event starts
    pub transfer_deadline_before_event: Duration,
    /// Rescans within this window of the last scan are flagged rapid
    pub rapid_scan_window: Duration,
    /// Rescans within this window of the first scan are still admitted
    pub reentry_grace: Duration,
    /// Cadence of the background reconciliation pass
    pub reconcile_interval: StdDuration,
    /// Cadence of the expiry sweeps
    pub sweep_interval: StdDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait: StdDuration::from_secs(5),
            reservation_ttl: Duration::minutes(5),
            transfer_request_ttl: Duration::hours(48),
            approval_required_for_resale: false,
            transfer_deadline_before_event: Duration::zero(),
            rapid_scan_window: Duration::seconds(30),
            reentry_grace: Duration::minutes(5),
            reconcile_interval: StdDuration::from_secs(300),
            sweep_interval: StdDuration::from_secs(60),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Event-store database
    pub postgres: PostgresConfig,
    /// Engine tuning
    pub engine: EngineConfig,
}

impl Config {
    /// Loads configuration from the environment, falling back to
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            postgres: PostgresConfig {
                url: env_or(
                    "DATABASE_URL",
                    "postgres://localhost:5432/stagepass".to_string(),
                ),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
            },
            engine: EngineConfig {
                lock_wait: StdDuration::from_millis(parse_or("LOCK_WAIT_MS", 5_000)),
                reservation_ttl: Duration::seconds(parse_or("RESERVATION_TTL_SECS", 300)),
                transfer_request_ttl: Duration::seconds(parse_or(
                    "TRANSFER_REQUEST_TTL_SECS",
                    48 * 3600,
                )),
                approval_required_for_resale: parse_or("TRANSFER_APPROVAL_REQUIRED", false),
                transfer_deadline_before_event: Duration::seconds(parse_or(
                    "TRANSFER_DEADLINE_SECS",
                    0,
                )),
                rapid_scan_window: Duration::seconds(parse_or("RAPID_SCAN_WINDOW_SECS", 30)),
                reentry_grace: Duration::seconds(parse_or("REENTRY_GRACE_SECS", 300)),
                reconcile_interval: StdDuration::from_secs(parse_or(
                    "RECONCILE_INTERVAL_SECS",
                    300,
                )),
                sweep_interval: StdDuration::from_secs(parse_or("SWEEP_INTERVAL_SECS", 60)),
            },
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.reservation_ttl, Duration::minutes(5));
        assert_eq!(config.rapid_scan_window, Duration::seconds(30));
        assert_eq!(config.reentry_grace, Duration::minutes(5));
        assert!(config.lock_wait >= StdDuration::from_secs(1));
    }
}
