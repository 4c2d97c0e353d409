//! Configuration for the shouban trading bot.
//!
//! Loaded from a JSON file (`shouban.json` by default, overridable via the
//! `SHOUBAN_CONFIG` environment variable). Every section and field has a
//! default, so a missing file yields a fully usable configuration.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration structure for the bot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Market data gateway configuration
    #[serde(default)]
    pub market: MarketConfig,

    /// Broker gateway configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Strategy tunables
    #[serde(default)]
    pub trading: TradingConfig,

    /// Job schedule configuration
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable fallbacks.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SHOUBAN_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(url) = std::env::var("SHOUBAN_BROKER_URL") {
            self.broker.base_url = url;
        }
        if let Ok(token) = std::env::var("SHOUBAN_BROKER_TOKEN") {
            self.broker.token = Some(token);
        }
    }

    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.trading.notional <= 0.0 {
            return Err(crate::Error::Config(
                "trading.notional must be positive".to_string(),
            ));
        }
        if self.trading.per_sector_cap == 0 {
            return Err(crate::Error::Config(
                "trading.per_sector_cap must be at least 1".to_string(),
            ));
        }
        if self.schedule.tick_secs == 0 {
            return Err(crate::Error::Config(
                "schedule.tick_secs must be at least 1".to_string(),
            ));
        }
        for (name, expr) in [
            ("daily_refresh", &self.schedule.daily_refresh),
            ("window_open_morning", &self.schedule.window_open_morning),
            ("window_close_morning", &self.schedule.window_close_morning),
            ("window_open_afternoon", &self.schedule.window_open_afternoon),
            (
                "window_close_afternoon",
                &self.schedule.window_close_afternoon,
            ),
        ] {
            cron::Schedule::from_str(expr).map_err(|e| {
                crate::Error::Config(format!("schedule.{} is not a valid cron expression: {}", name, e))
            })?;
        }
        Ok(())
    }
}

/// Resolve the config file path from the environment.
fn config_path() -> PathBuf {
    std::env::var("SHOUBAN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("shouban.json"))
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Market data gateway
// ============================================================================

/// Market data gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_market_timeout")]
    pub timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_market_timeout(),
        }
    }
}

fn default_market_timeout() -> u64 {
    15
}

// ============================================================================
// Broker gateway
// ============================================================================

/// Broker gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Base URL of the broker HTTP gateway
    #[serde(default = "default_broker_url")]
    pub base_url: String,

    /// Bearer token for the broker gateway (no default; set via config file
    /// or `SHOUBAN_BROKER_TOKEN`)
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_broker_timeout")]
    pub timeout_secs: u64,

    /// Attempts per call before giving up (transport failures only)
    #[serde(default = "default_broker_retries")]
    pub max_retries: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_broker_url(),
            token: None,
            timeout_secs: default_broker_timeout(),
            max_retries: default_broker_retries(),
        }
    }
}

fn default_broker_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_broker_timeout() -> u64 {
    15
}

fn default_broker_retries() -> u32 {
    3
}

// ============================================================================
// Strategy tunables
// ============================================================================

/// Strategy tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Target notional per order in currency units
    #[serde(default = "default_notional")]
    pub notional: f64,

    /// Maximum buys per sector per day
    #[serde(default = "default_per_sector_cap")]
    pub per_sector_cap: u32,

    /// Number of top sector boards to scan
    #[serde(default = "default_top_sectors")]
    pub top_sectors: usize,

    /// Intraday cutoff hour (local time); no buying at or after the cutoff
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,

    /// Intraday cutoff minute (local time)
    #[serde(default = "default_cutoff_minute")]
    pub cutoff_minute: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            notional: default_notional(),
            per_sector_cap: default_per_sector_cap(),
            top_sectors: default_top_sectors(),
            cutoff_hour: default_cutoff_hour(),
            cutoff_minute: default_cutoff_minute(),
        }
    }
}

fn default_notional() -> f64 {
    10_000.0
}

fn default_per_sector_cap() -> u32 {
    2
}

fn default_top_sectors() -> usize {
    10
}

fn default_cutoff_hour() -> u32 {
    10
}

fn default_cutoff_minute() -> u32 {
    30
}

// ============================================================================
// Schedule
// ============================================================================

/// Job schedule configuration.
///
/// Cron expressions use the 6-field form (sec min hour dom month dow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Daily cache refresh (default: 9:15 on weekdays, before open)
    #[serde(default = "default_daily_refresh_cron")]
    pub daily_refresh: String,

    /// Morning window open (default: 9:30 on weekdays)
    #[serde(default = "default_morning_open_cron")]
    pub window_open_morning: String,

    /// Morning window close (default: 11:30 lunch break)
    #[serde(default = "default_morning_close_cron")]
    pub window_close_morning: String,

    /// Afternoon window open (default: 13:00 on weekdays)
    #[serde(default = "default_afternoon_open_cron")]
    pub window_open_afternoon: String,

    /// Afternoon window close (default: 15:00 market close)
    #[serde(default = "default_afternoon_close_cron")]
    pub window_close_afternoon: String,

    /// Seconds between pipeline ticks while a window is open
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_refresh: default_daily_refresh_cron(),
            window_open_morning: default_morning_open_cron(),
            window_close_morning: default_morning_close_cron(),
            window_open_afternoon: default_afternoon_open_cron(),
            window_close_afternoon: default_afternoon_close_cron(),
            tick_secs: default_tick_secs(),
        }
    }
}

// Day-of-week by name: the cron crate numbers days Quartz-style, so numeric
// ranges are easy to get wrong.

fn default_daily_refresh_cron() -> String {
    "0 15 9 * * Mon-Fri".to_string() // 9:15 on weekdays
}

fn default_morning_open_cron() -> String {
    "0 30 9 * * Mon-Fri".to_string() // 9:30 on weekdays
}

fn default_morning_close_cron() -> String {
    "0 30 11 * * Mon-Fri".to_string() // 11:30 on weekdays
}

fn default_afternoon_open_cron() -> String {
    "0 0 13 * * Mon-Fri".to_string() // 13:00 on weekdays
}

fn default_afternoon_close_cron() -> String {
    "0 0 15 * * Mon-Fri".to_string() // 15:00 on weekdays
}

fn default_tick_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.observability.log_format, "pretty");
        assert_eq!(config.market.timeout_secs, 15);
        assert_eq!(config.broker.max_retries, 3);
        assert!(config.broker.token.is_none());
        assert_eq!(config.trading.notional, 10_000.0);
        assert_eq!(config.trading.per_sector_cap, 2);
        assert_eq!(config.trading.top_sectors, 10);
        assert_eq!(config.trading.cutoff_hour, 10);
        assert_eq!(config.trading.cutoff_minute, 30);
        assert_eq!(config.schedule.tick_secs, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.trading.notional, config.trading.notional);
        assert_eq!(parsed.schedule.daily_refresh, config.schedule.daily_refresh);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"broker": {{"base_url": "http://10.0.0.1:5000", "token": "abc"}},
                "trading": {{"notional": 20000.0}}}}"#
        )
        .unwrap();

        let config = Config::load_from(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.broker.base_url, "http://10.0.0.1:5000");
        assert_eq!(config.broker.token.as_deref(), Some("abc"));
        assert_eq!(config.trading.notional, 20_000.0);
        // Untouched sections fall back to defaults
        assert_eq!(config.trading.per_sector_cap, 2);
        assert_eq!(config.schedule.tick_secs, 10);
    }

    #[test]
    fn test_load_from_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Config::load_from(&file.path().to_path_buf()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("SHOUBAN_LOG_LEVEL", "debug");
        std::env::set_var("SHOUBAN_BROKER_URL", "http://10.0.0.2:5000");
        std::env::set_var("SHOUBAN_BROKER_TOKEN", "secret");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.broker.base_url, "http://10.0.0.2:5000");
        assert_eq!(config.broker.token.as_deref(), Some("secret"));

        std::env::remove_var("SHOUBAN_LOG_LEVEL");
        std::env::remove_var("SHOUBAN_BROKER_URL");
        std::env::remove_var("SHOUBAN_BROKER_TOKEN");
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let mut config = Config::default();
        config.schedule.daily_refresh = "not a cron".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("daily_refresh"));
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let mut config = Config::default();
        config.trading.per_sector_cap = 0;
        assert!(config.validate().is_err());
    }
}
