//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::{FixedOffset, Offset, Utc};
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// When unset, the in-memory store is authoritative (single-process mode).
    pub database_url: Option<String>,
    pub log_level: Level,
    /// How often the reaper sweeps for abandoned sessions.
    pub reaper_interval_secs: u64,
    /// How long a session may go without a signal before it is reaped.
    pub stale_session_secs: i64,
    /// Offset of the tracking timezone from UTC, in hours. Daily stat
    /// buckets are keyed in this timezone, not UTC-naive.
    pub utc_offset_hours: i32,
    /// Minutes of study per day that mark the daily goal as met.
    pub daily_goal_minutes: i64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let reaper_interval_secs = parse_var("REAPER_INTERVAL_SECS", 300_u64)?;
        let stale_session_secs = parse_var("STALE_SESSION_SECS", 900_i64)?;
        let daily_goal_minutes = parse_var("DAILY_GOAL_MINUTES", 30_i64)?;

        let utc_offset_hours = parse_var("UTC_OFFSET_HOURS", 0_i32)?;
        if !(-12..=14).contains(&utc_offset_hours) {
            return Err(ConfigError::InvalidValue(
                "UTC_OFFSET_HOURS".to_string(),
                format!("'{}' is not a valid UTC offset", utc_offset_hours),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            reaper_interval_secs,
            stale_session_secs,
            utc_offset_hours,
            daily_goal_minutes,
        })
    }

    /// The tracking timezone as a fixed offset.
    pub fn timezone(&self) -> FixedOffset {
        // The offset was validated in `from_env`.
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_session_secs)
    }

    pub fn daily_goal_secs(&self) -> i64 {
        self.daily_goal_minutes * 60
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("could not parse '{}'", raw))
        }),
        Err(_) => Ok(default),
    }
}
