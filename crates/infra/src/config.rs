//! Configuration loading and representation.
//!
//! Everything is read from environment variables; every struct also has a
//! `Default` and builder-style setters for programmatic use.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::alerts::dispatcher::DEFAULT_ALERT_TIMEOUT;
use crate::alerts::{AlertDispatcher, AlertSink, LogAlertSink, NullAlertSink};

pub const ENV_SWEEP_ENABLED: &str = "STOCKWATCH_SWEEP_ENABLED";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "STOCKWATCH_SWEEP_INTERVAL_SECS";
pub const ENV_CAS_RETRIES: &str = "STOCKWATCH_CAS_RETRIES";
pub const ENV_ALERT_TIMEOUT_MS: &str = "STOCKWATCH_ALERT_TIMEOUT_MS";
pub const ENV_DETACH_ALERTS: &str = "STOCKWATCH_DETACH_ALERTS";
pub const ENV_ALERT_CHANNEL: &str = "STOCKWATCH_ALERT_CHANNEL";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DATABASE_MAX_CONNECTIONS: &str = "STOCKWATCH_DATABASE_MAX_CONNECTIONS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Low-stock sweeper schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60),
        }
    }
}

impl SweeperConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let enabled = parse_bool(get, ENV_SWEEP_ENABLED)?.unwrap_or(defaults.enabled);
        let interval = match parse_u64(get, ENV_SWEEP_INTERVAL_SECS)? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    ENV_SWEEP_INTERVAL_SECS,
                    "interval must be at least one second",
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.interval,
        };
        Ok(Self { enabled, interval })
    }
}

/// Stock transaction engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How many compare-and-set conflicts a movement tolerates before failing.
    pub max_conflict_retries: u32,
    /// Deliver reorder alerts on a background task instead of awaiting them.
    pub detach_alerts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 32,
            detach_alerts: true,
        }
    }
}

impl EngineConfig {
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_detach_alerts(mut self, detach: bool) -> Self {
        self.detach_alerts = detach;
        self
    }

    fn from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_conflict_retries = match parse_u64(get, ENV_CAS_RETRIES)? {
            Some(n) => u32::try_from(n)
                .map_err(|_| ConfigError::invalid(ENV_CAS_RETRIES, "value too large"))?,
            None => defaults.max_conflict_retries,
        };
        let detach_alerts = parse_bool(get, ENV_DETACH_ALERTS)?.unwrap_or(defaults.detach_alerts);
        Ok(Self {
            max_conflict_retries,
            detach_alerts,
        })
    }
}

/// Which alert transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertChannel {
    /// `tracing` warn records.
    #[default]
    Log,
    /// Unconfigured; alerts are dropped silently.
    None,
}

/// Alert transport and delivery bound, shared by the engine and the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub channel: AlertChannel,
    /// Upper bound on a single delivery.
    pub timeout: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channel: AlertChannel::default(),
            timeout: DEFAULT_ALERT_TIMEOUT,
        }
    }
}

impl AlertConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sink for the configured channel wrapped with the configured timeout.
    pub fn build_dispatcher(&self) -> AlertDispatcher {
        AlertDispatcher::new(self.build_sink(), self.timeout)
    }

    pub fn with_channel(mut self, channel: AlertChannel) -> Self {
        self.channel = channel;
        self
    }

    /// Select the sink once, at startup.
    pub fn build_sink(&self) -> Arc<dyn AlertSink> {
        match self.channel {
            AlertChannel::Log => Arc::new(LogAlertSink),
            AlertChannel::None => Arc::new(NullAlertSink),
        }
    }

    fn from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let channel = match get(ENV_ALERT_CHANNEL).as_deref().map(str::trim) {
            None | Some("") => AlertChannel::default(),
            Some(v) if v.eq_ignore_ascii_case("log") => AlertChannel::Log,
            Some(v) if v.eq_ignore_ascii_case("none") => AlertChannel::None,
            Some(other) => {
                return Err(ConfigError::invalid(
                    ENV_ALERT_CHANNEL,
                    format!("expected 'log' or 'none', got '{other}'"),
                ));
            }
        };
        let timeout = match parse_u64(get, ENV_ALERT_TIMEOUT_MS)? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    ENV_ALERT_TIMEOUT_MS,
                    "timeout must be positive",
                ));
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_ALERT_TIMEOUT,
        };
        Ok(Self { channel, timeout })
    }
}

/// Storage backend selection: Postgres when a URL is given, in-memory otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
        }
    }
}

impl StorageConfig {
    fn from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let database_url = get(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty());
        let max_connections = match parse_u64(get, ENV_DATABASE_MAX_CONNECTIONS)? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    ENV_DATABASE_MAX_CONNECTIONS,
                    "must be at least 1",
                ));
            }
            Some(n) => u32::try_from(n).map_err(|_| {
                ConfigError::invalid(ENV_DATABASE_MAX_CONNECTIONS, "value too large")
            })?,
            None => defaults.max_connections,
        };
        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

/// Process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub sweeper: SweeperConfig,
    pub engine: EngineConfig,
    pub alerts: AlertConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            sweeper: SweeperConfig::from_lookup(&get)?,
            engine: EngineConfig::from_lookup(&get)?,
            alerts: AlertConfig::from_lookup(&get)?,
            storage: StorageConfig::from_lookup(&get)?,
        })
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::invalid(key, format!("not a boolean: '{other}'"))),
        },
    }
}

fn parse_u64(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
    }
}
