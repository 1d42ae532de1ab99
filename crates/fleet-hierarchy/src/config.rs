//! Engine configuration.
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for local development.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// How a new account's sibling index is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingIndexing {
    /// Number of existing siblings plus one, moved forward past any segment a
    /// live sibling already uses.
    ///
    /// A segment freed by a delete may be handed out again later.
    Count,
    /// Highest trailing segment among existing siblings plus one.
    NextFree,
}

impl SiblingIndexing {
    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "count" => Some(Self::Count),
            "next_free" | "next-free" | "max" => Some(Self::NextFree),
            _ => None,
        }
    }
}

/// Hierarchy engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// Deadline for each individual store call, in milliseconds.
    pub store_timeout_ms: u64,

    /// Sibling index strategy for create and move.
    pub sibling_indexing: SiblingIndexing,

    /// Serialize create/move/remove per tenant inside this process.
    pub serialize_mutations: bool,

    /// Emit a telemetry event after every engine call.
    pub telemetry_enabled: bool,

    /// Deadline for a single telemetry emit, in milliseconds.
    pub telemetry_timeout_ms: u64,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
            sibling_indexing: SiblingIndexing::Count,
            serialize_mutations: true,
            telemetry_enabled: true,
            telemetry_timeout_ms: 1_000,
        }
    }
}

impl HierarchyConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HIERARCHY_STORE_TIMEOUT_MS`: per-call store deadline (default: 5000)
    /// - `HIERARCHY_SIBLING_INDEXING`: `count` or `next_free` (default: count)
    /// - `HIERARCHY_SERIALIZE_MUTATIONS`: per-tenant mutation lock (default: true)
    /// - `HIERARCHY_TELEMETRY_ENABLED`: emit telemetry events (default: true)
    /// - `HIERARCHY_TELEMETRY_TIMEOUT_MS`: per-emit deadline (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();

        let sibling_indexing = match std::env::var("HIERARCHY_SIBLING_INDEXING") {
            Ok(raw) => SiblingIndexing::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "HIERARCHY_SIBLING_INDEXING".to_string(),
                message: format!("expected 'count' or 'next_free', got '{}'", raw),
            })?,
            Err(_) => default.sibling_indexing,
        };

        let config = Self {
            store_timeout_ms: parse_env("HIERARCHY_STORE_TIMEOUT_MS")?
                .unwrap_or(default.store_timeout_ms),
            sibling_indexing,
            serialize_mutations: std::env::var("HIERARCHY_SERIALIZE_MUTATIONS")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.serialize_mutations),
            telemetry_enabled: std::env::var("HIERARCHY_TELEMETRY_ENABLED")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.telemetry_enabled),
            telemetry_timeout_ms: parse_env("HIERARCHY_TELEMETRY_TIMEOUT_MS")?
                .unwrap_or(default.telemetry_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "store_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.telemetry_enabled && self.telemetry_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "telemetry_timeout_ms".to_string(),
                message: "must be greater than zero when telemetry is enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Get the store call deadline as a Duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Get the telemetry emit deadline as a Duration.
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }
}

fn parse_env(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{}", e),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HierarchyConfig::default();
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.sibling_indexing, SiblingIndexing::Count);
        assert!(config.serialize_mutations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sibling_indexing_parse() {
        assert_eq!(SiblingIndexing::parse("COUNT"), Some(SiblingIndexing::Count));
        assert_eq!(SiblingIndexing::parse("next_free"), Some(SiblingIndexing::NextFree));
        assert_eq!(SiblingIndexing::parse("random"), None);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = HierarchyConfig {
            store_timeout_ms: 0,
            ..HierarchyConfig::default()
        };
        assert!(config.validate().is_err());

        let config = HierarchyConfig {
            telemetry_enabled: false,
            telemetry_timeout_ms: 0,
            ..HierarchyConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
