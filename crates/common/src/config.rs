//! Configuration structures for QP Driver
//!
//! This module defines all configuration types for the xApp.
//! Configurations are loaded from YAML files and can be overridden by
//! environment variables.

use crate::error::{QpDriverError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the QP Driver xApp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QpDriverConfig {
    /// Message transport listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Use the in-memory shared-data backend instead of the real one
    #[serde(default)]
    pub use_fake_sdl: bool,

    /// Shared-data namespace holding per-UE metric records
    #[serde(default = "default_sdl_namespace")]
    pub sdl_namespace: String,

    /// UE identifiers to resolve per steering request
    ///
    /// The policy payload is expected to supply this eventually; until the
    /// extraction rule is defined the batch comes from configuration, with
    /// a reference default representative of one cell's active set.
    #[serde(default = "default_ue_batch")]
    pub ue_batch: Vec<String>,

    /// Shared-data lookup fan-out tuning
    #[serde(default)]
    pub lookup: LookupConfig,

    /// Outbound send retry policy
    #[serde(default)]
    pub send_retry: SendRetryConfig,

    /// Observability configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// Bounded-concurrency fan-out parameters for per-UE lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Maximum number of lookups in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-lookup timeout in milliseconds
    #[serde(default = "default_lookup_timeout_ms")]
    pub timeout_ms: u64,

    /// Cap on total batch resolution latency in milliseconds
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

/// Retry policy for the outbound prediction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRetryConfig {
    /// Maximum send attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds, doubled after each failure
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Default value functions
fn default_listen_port() -> u16 {
    4560
}

fn default_sdl_namespace() -> String {
    "TS-UE-metrics".to_string()
}

fn default_ue_batch() -> Vec<String> {
    ["257", "258", "259", "260", "261", "262", "264", "265"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_concurrency() -> usize {
    8
}

fn default_lookup_timeout_ms() -> u64 {
    250
}

fn default_batch_timeout_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_lookup_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

impl Default for SendRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl QpDriverConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            QpDriverError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: QpDriverConfig = serde_yaml::from_str(&content).map_err(|e| {
            QpDriverError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Mirrors the container deployment: `USE_FAKE_SDL` selects the
    /// in-memory backend, everything else takes the defaults.
    pub fn from_env() -> Result<Self> {
        let config = QpDriverConfig {
            listen_port: std::env::var("QPDRIVER_RMR_PORT")
                .unwrap_or_else(|_| default_listen_port().to_string())
                .parse()
                .map_err(|_| QpDriverError::Config("Invalid listen port".to_string()))?,
            use_fake_sdl: std::env::var("USE_FAKE_SDL").is_ok(),
            sdl_namespace: default_sdl_namespace(),
            ue_batch: default_ue_batch(),
            lookup: LookupConfig::default(),
            send_retry: SendRetryConfig::default(),
            observability: None,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sdl_namespace.trim().is_empty() {
            return Err(QpDriverError::config("sdl_namespace must not be empty"));
        }

        if self.lookup.max_concurrency == 0 {
            return Err(QpDriverError::config("lookup.max_concurrency must be at least 1"));
        }

        if self.send_retry.max_attempts == 0 {
            return Err(QpDriverError::config("send_retry.max_attempts must be at least 1"));
        }

        // UE identifiers must stay unique after trimming, otherwise one
        // record would surface twice in the outbound request.
        let mut seen = HashSet::new();
        for ueid in &self.ue_batch {
            let normalized = ueid.trim();
            if normalized.is_empty() {
                return Err(QpDriverError::config("ue_batch contains an empty identifier"));
            }
            if !seen.insert(normalized.to_string()) {
                return Err(QpDriverError::Config(format!(
                    "ue_batch contains duplicate identifier: {}",
                    normalized
                )));
            }
        }

        Ok(())
    }

    /// Get the per-lookup timeout as Duration
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup.timeout_ms)
    }

    /// Get the whole-batch timeout as Duration
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup.batch_timeout_ms)
    }

    /// Get the initial send backoff as Duration
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.send_retry.initial_backoff_ms)
    }
}

impl Default for QpDriverConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            use_fake_sdl: false,
            sdl_namespace: default_sdl_namespace(),
            ue_batch: default_ue_batch(),
            lookup: LookupConfig::default(),
            send_retry: SendRetryConfig::default(),
            observability: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = QpDriverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_port, 4560);
        assert_eq!(config.sdl_namespace, "TS-UE-metrics");
        assert_eq!(config.ue_batch.len(), 8);
    }

    #[test]
    fn test_duplicate_ueid_rejected() {
        let config = QpDriverConfig {
            ue_batch: vec!["257".to_string(), " 257 ".to_string()],
            ..QpDriverConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = QpDriverConfig {
            lookup: LookupConfig {
                max_concurrency: 0,
                ..LookupConfig::default()
            },
            ..QpDriverConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
listen_port: 4562
use_fake_sdl: true
ue_batch: ["1", "2", "3"]
lookup:
  max_concurrency: 4
  timeout_ms: 100
"#;

        let config: QpDriverConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_port, 4562);
        assert!(config.use_fake_sdl);
        assert_eq!(config.lookup.max_concurrency, 4);
        // Unspecified fields fall back to defaults
        assert_eq!(config.lookup.batch_timeout_ms, 2000);
        assert_eq!(config.send_retry.max_attempts, 3);
    }
}
