//! Population engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default terminology server URL
const DEFAULT_TERMINOLOGY_SERVER: &str = "https://tx.fhir.org/r4";

/// Configuration for the population engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdcConfig {
    /// Budget for one whole population run (ms)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Value set expansion settings
    #[serde(default)]
    pub terminology: TerminologyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SdcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            terminology: TerminologyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SdcConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be > 0".into());
        }
        if self.terminology.enabled {
            if self.terminology.server_url.trim().is_empty() {
                return Err("terminology.enabled=true requires terminology.server_url".into());
            }
            if self.terminology.request_timeout_ms == 0 {
                return Err("terminology.request_timeout_ms must be > 0".into());
            }
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for value set expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminologyConfig {
    /// Enable remote expansion
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// URL of the terminology server (default: https://tx.fhir.org/r4)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Cache TTL in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Per-request timeout for `$expand` calls (ms)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            server_url: default_server_url(),
            cache_ttl_secs: default_cache_ttl(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl TerminologyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_timeout() -> u64 {
    10_000
}

fn default_enabled() -> bool {
    true
}

fn default_server_url() -> String {
    DEFAULT_TERMINOLOGY_SERVER.to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SdcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.terminology.server_url, "https://tx.fhir.org/r4");
    }

    #[test]
    fn test_partial_json_uses_field_defaults() {
        let config: SdcConfig =
            serde_json::from_str(r#"{"terminology": {"enabled": false}}"#).unwrap();
        assert_eq!(config.timeout_ms, 10_000);
        assert!(!config.terminology.enabled);
        assert_eq!(config.terminology.cache_ttl_secs, 3600);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SdcConfig::default();
        config.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SdcConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = SdcConfig::default();
        config.terminology.server_url = " ".into();
        assert!(config.validate().is_err());

        config.terminology.enabled = false;
        assert!(config.validate().is_ok());
    }
}
