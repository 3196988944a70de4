//! Core Configuration — operator-tunable TOML values
//!
//! Every timing constant and retention window the three services use is a
//! field here. Each struct implements `Default` with values matching the
//! documented behavior, so a missing config file changes nothing.
//!
//! ## Loading Order
//!
//! 1. Explicit path (`--config` flag)
//! 2. `$OPSFORGE_CONFIG` environment variable
//! 3. `./opsforge.toml` in the current working directory
//! 4. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Root configuration for an opsforge deployment
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage paths
    #[serde(default)]
    pub storage: StorageConfig,

    /// Task Coordinator tuning
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Job Queue tuning
    #[serde(default)]
    pub queue: QueueConfig,

    /// Self-Healing Engine tuning
    #[serde(default)]
    pub healing: HealingConfig,
}

impl CoreConfig {
    /// Load configuration using the standard search order.
    ///
    /// An explicit `path` (from the CLI) wins; a broken explicit file is a
    /// startup error rather than a silent fallback.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(p) = path {
            let config = Self::load_from_file(p)?;
            info!(path = %p.display(), "Loaded config from --config");
            return Ok(config);
        }

        if let Ok(env_path) = std::env::var("OPSFORGE_CONFIG") {
            let p = PathBuf::from(&env_path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from OPSFORGE_CONFIG");
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from OPSFORGE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %env_path, "OPSFORGE_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("opsforge.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./opsforge.toml");
                    return Ok(config);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./opsforge.toml, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the JSON API
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the sled database
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

/// Task Coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Heartbeat silence after which an agent is marked offline (seconds)
    #[serde(default = "default_agent_stale_secs")]
    pub agent_stale_secs: u64,

    /// Retention for completed/failed tasks (hours)
    #[serde(default = "default_task_retention_hours")]
    pub task_retention_hours: u64,

    /// Maintenance sweep interval (seconds)
    #[serde(default = "default_coordinator_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            agent_stale_secs: default_agent_stale_secs(),
            task_retention_hours: default_task_retention_hours(),
            sweep_interval_secs: default_coordinator_sweep_secs(),
        }
    }
}

fn default_agent_stale_secs() -> u64 {
    300
}

fn default_task_retention_hours() -> u64 {
    24
}

fn default_coordinator_sweep_secs() -> u64 {
    30
}

/// Job Queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Scheduled-job promotion sweep interval (seconds). Backoff delays are
    /// accurate to roughly this resolution.
    #[serde(default = "default_queue_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_queue_sweep_secs(),
        }
    }
}

fn default_queue_sweep_secs() -> u64 {
    1
}

/// Self-Healing Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Circuit-breaker cooldown (seconds)
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    /// Delay before a transient-failure retry job becomes eligible (seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Retention for resolved escalations (days)
    #[serde(default = "default_escalation_retention_days")]
    pub escalation_retention_days: u64,

    /// Retention for heal-action records (hours)
    #[serde(default = "default_action_retention_hours")]
    pub action_retention_hours: u64,

    /// Maintenance sweep interval (seconds)
    #[serde(default = "default_healing_sweep_secs")]
    pub sweep_interval_secs: u64,

    /// Submit a deep-analysis task to the coordinator on escalation
    #[serde(default)]
    pub deep_analysis: bool,

    /// Repository-resync service endpoint; resync strategy is a no-op when unset
    #[serde(default)]
    pub resync_url: Option<String>,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            escalation_retention_days: default_escalation_retention_days(),
            action_retention_hours: default_action_retention_hours(),
            sweep_interval_secs: default_healing_sweep_secs(),
            deep_analysis: false,
            resync_url: None,
        }
    }
}

fn default_breaker_cooldown_secs() -> u64 {
    300
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_escalation_retention_days() -> u64 {
    7
}

fn default_action_retention_hours() -> u64 {
    24
}

fn default_healing_sweep_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.coordinator.agent_stale_secs, 300);
        assert_eq!(config.coordinator.task_retention_hours, 24);
        assert_eq!(config.queue.sweep_interval_secs, 1);
        assert_eq!(config.healing.breaker_cooldown_secs, 300);
        assert_eq!(config.healing.escalation_retention_days, 7);
        assert!(!config.healing.deep_analysis);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            [coordinator]
            agent_stale_secs = 120

            [healing]
            deep_analysis = true
        "#;
        let config: CoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.coordinator.agent_stale_secs, 120);
        assert!(config.healing.deep_analysis);
        // Untouched sections keep their defaults
        assert_eq!(config.coordinator.task_retention_hours, 24);
        assert_eq!(config.server.addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = CoreConfig::load(Some(Path::new("/nonexistent/opsforge.toml")));
        assert!(result.is_err());
    }
}
