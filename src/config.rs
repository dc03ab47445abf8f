//! Hub configuration.
//!
//! Loaded from an optional JSON file, then overridden by `FIZHUB_*`
//! environment variables and finally by CLI flags (see `main.rs`).
//! Durations are written Go-style: `"30s"`, `"5m"`, `"1m30s"`, `"250ms"`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding the validation service base URL.
pub const VALIDATION_URL_ENV: &str = "FIZHUB_VALIDATION_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode config: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub base_url: String,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub retry_count: u32,
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://nfc.cursive.team".to_string(),
            timeout: Duration::from_secs(30),
            retry_count: 0,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// A device is demoted to offline once it has been silent this long.
    #[serde(with = "duration_str")]
    pub liveness_timeout: Duration,
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerConfig {
    #[serde(with = "duration_str")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_str")]
    pub deep_sleep_delay: Duration,
    #[serde(with = "duration_str")]
    pub check_interval: Duration,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            deep_sleep_delay: Duration::from_secs(10 * 60),
            check_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderConfig {
    #[serde(with = "duration_str")]
    pub max_duration: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(3 * 60),
        }
    }
}

/// Top-level hub configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    pub validation: ValidationConfig,
    pub registry: RegistryConfig,
    pub power: PowerConfig,
    pub recorder: RecorderConfig,
    #[serde(with = "duration_str")]
    pub shutdown_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            registry: RegistryConfig::default(),
            power: PowerConfig::default(),
            recorder: RecorderConfig::default(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl HubConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file is not an error: the defaults are used instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "Configuration file {} not found, using default configuration",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let config = Self::from_json(&raw)?;
        log::info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Decode and validate a JSON config.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the periodic loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("registry.sweep_interval", self.registry.sweep_interval),
            ("power.check_interval", self.power.check_interval),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(ConfigError::ZeroPeriod(name));
            }
        }
        Ok(())
    }

    /// Apply `FIZHUB_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(VALIDATION_URL_ENV) {
            if !url.is_empty() {
                self.validation.base_url = url;
            }
        }
    }
}

/// Parse a Go-style duration string such as `"1m30s"` or `"250ms"`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_secs = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        let part = Duration::try_from_secs_f64(value * unit_secs).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }
    Ok(total)
}

/// Render a duration back into the compact Go-style form.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    out
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_hub_behavior() {
        let config = HubConfig::default();
        assert_eq!(config.registry.liveness_timeout, Duration::from_secs(60));
        assert_eq!(config.registry.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.power.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.power.deep_sleep_delay, Duration::from_secs(600));
        assert_eq!(config.power.check_interval, Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.validation.base_url, "http://nfc.cursive.team");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10 parsecs").is_err());
        assert!(matches!(
            parse_duration("99999999999999999999h"),
            Err(ConfigError::InvalidDuration(_))
        ));
        assert!(parse_duration("5000000000000000h5000000000000000h").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = HubConfig::from_json(
            r#"{
                "validation": { "base_url": "http://localhost:9000", "timeout": "5s" },
                "power": { "idle_timeout": "1m" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.validation.base_url, "http://localhost:9000");
        assert_eq!(config.validation.timeout, Duration::from_secs(5));
        assert_eq!(config.validation.retry_count, 0);
        assert_eq!(config.power.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.power.deep_sleep_delay, Duration::from_secs(600));
        assert_eq!(config.registry, RegistryConfig::default());
    }

    #[test]
    fn test_bad_duration_is_decode_error() {
        let err = HubConfig::from_json(r#"{ "shutdown_timeout": "soon" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Decode(_)));
    }

    #[test]
    fn test_zero_periods_rejected() {
        let err = HubConfig::from_json(r#"{ "power": { "check_interval": "0s" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeriod("power.check_interval")));

        let err = HubConfig::from_json(r#"{ "registry": { "sweep_interval": "0" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeriod("registry.sweep_interval")));

        // Zero is fine where it is not a loop period.
        let config = HubConfig::from_json(r#"{ "validation": { "retry_delay": "0s" } }"#).unwrap();
        assert_eq!(config.validation.retry_delay, Duration::ZERO);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = HubConfig::load("/nonexistent/fizhub/config.json").unwrap();
        assert_eq!(config, HubConfig::default());
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/config.json");
        let config = HubConfig::load(path).unwrap();
        assert_eq!(config.validation.retry_count, 2);
        assert_eq!(config.power.deep_sleep_delay, Duration::from_secs(600));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }
}
