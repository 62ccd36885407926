//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for Machine QA, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults matching the shipped config files
//! - Builder-free programmatic access via `Config::defaults()`
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `MACHINE_QA_CONFIG_DIR` | Base directory for config files | `.` |
//! | `MACHINE_QA_WEBHOOK_URL` | Report webhook endpoint | (unset = reports disabled) |
//! | `MACHINE_QA_SESSION_DIR` | Base directory for run artifacts | `/tmp/machine-qa` |
//! | `MACHINE_QA_SPIN_INTERVAL` | Target endurance-loop interval (seconds) | `5.0` |
//! | `MACHINE_QA_MAX_SPINS` | Default spins per machine | `10` |
//! | `MACHINE_QA_STAGNATION_LIMIT` | Unchanged balance samples before the special flow fires | `10` |
//! | `MACHINE_QA_SIMILARITY_THRESHOLD` | Default image-comparison pass threshold | `0.8` |
//!
//! # Example
//!
//! ```bash
//! # Point at a different config tree and slow the loop down
//! export MACHINE_QA_CONFIG_DIR="/srv/qa/floor-3"
//! export MACHINE_QA_SPIN_INTERVAL="8.0"
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default base directory for config files (profiles, backlog, actions)
pub const DEFAULT_CONFIG_DIR: &str = ".";

/// Default base directory for run artifact sessions
pub const DEFAULT_SESSION_DIR: &str = "/tmp/machine-qa";

/// Default target interval of one endurance iteration (seconds)
pub const DEFAULT_SPIN_INTERVAL: f64 = 5.0;

/// Default maximum spins per machine
pub const DEFAULT_MAX_SPINS: u32 = 10;

/// Consecutive unchanged balance samples before the special flow fires
pub const DEFAULT_STAGNATION_LIMIT: u32 = 10;

/// Default similarity threshold for image comparisons
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Webhook delivery retries beyond the first attempt
pub const DEFAULT_WEBHOOK_RETRIES: u32 = 2;

/// Webhook request timeout (seconds)
pub const DEFAULT_WEBHOOK_TIMEOUT: u64 = 6;

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the config base directory
pub const ENV_CONFIG_DIR: &str = "MACHINE_QA_CONFIG_DIR";

/// Environment variable for the report webhook URL
pub const ENV_WEBHOOK_URL: &str = "MACHINE_QA_WEBHOOK_URL";

/// Environment variable for the artifact session directory
pub const ENV_SESSION_DIR: &str = "MACHINE_QA_SESSION_DIR";

/// Environment variable for the endurance-loop interval
pub const ENV_SPIN_INTERVAL: &str = "MACHINE_QA_SPIN_INTERVAL";

/// Environment variable for the default spin count
pub const ENV_MAX_SPINS: &str = "MACHINE_QA_MAX_SPINS";

/// Environment variable for the stagnation limit
pub const ENV_STAGNATION_LIMIT: &str = "MACHINE_QA_STAGNATION_LIMIT";

/// Environment variable for the similarity threshold
pub const ENV_SIMILARITY_THRESHOLD: &str = "MACHINE_QA_SIMILARITY_THRESHOLD";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for Machine QA
#[derive(Debug, Clone)]
pub struct Config {
    /// Config-file locations
    pub paths: PathSettings,
    /// Report delivery settings
    pub webhook: WebhookSettings,
    /// Endurance-loop defaults
    pub endurance: EnduranceSettings,
    /// Analyzer defaults
    pub analysis: AnalysisSettings,
}

/// Config-file locations
#[derive(Debug, Clone)]
pub struct PathSettings {
    /// Base directory holding game_config.json, machine_profiles/, etc.
    pub config_dir: String,
    /// Base directory for run artifact sessions
    pub session_dir: String,
}

/// Report delivery settings
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// Webhook endpoint URL (empty = delivery disabled)
    pub url: String,
    /// Retries beyond the first attempt
    pub retries: u32,
    /// Per-request timeout (seconds)
    pub timeout: u64,
}

/// Endurance-loop defaults (overridable per scenario)
#[derive(Debug, Clone)]
pub struct EnduranceSettings {
    /// Target wall-clock interval of one iteration (seconds)
    pub spin_interval: f64,
    /// Default maximum spins per machine
    pub max_spins: u32,
    /// Unchanged balance samples before the special flow fires
    pub stagnation_limit: u32,
}

/// Analyzer defaults
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Default image-comparison pass threshold
    pub similarity_threshold: f64,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            paths: PathSettings::from_env(),
            webhook: WebhookSettings::from_env(),
            endurance: EnduranceSettings::from_env(),
            analysis: AnalysisSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            paths: PathSettings::defaults(),
            webhook: WebhookSettings::defaults(),
            endurance: EnduranceSettings::defaults(),
            analysis: AnalysisSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PathSettings {
    /// Create path settings from environment variables
    pub fn from_env() -> Self {
        Self {
            config_dir: env::var(ENV_CONFIG_DIR)
                .unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string()),
            session_dir: env::var(ENV_SESSION_DIR)
                .unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    /// Create path settings with defaults
    pub fn defaults() -> Self {
        Self {
            config_dir: DEFAULT_CONFIG_DIR.to_string(),
            session_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

impl WebhookSettings {
    /// Create webhook settings from environment variables
    pub fn from_env() -> Self {
        Self {
            url: env::var(ENV_WEBHOOK_URL).unwrap_or_default(),
            retries: DEFAULT_WEBHOOK_RETRIES,
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }

    /// Create webhook settings with defaults
    pub fn defaults() -> Self {
        Self {
            url: String::new(),
            retries: DEFAULT_WEBHOOK_RETRIES,
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }
}

impl EnduranceSettings {
    /// Create endurance settings from environment variables
    pub fn from_env() -> Self {
        Self {
            spin_interval: env::var(ENV_SPIN_INTERVAL)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SPIN_INTERVAL),
            max_spins: env::var(ENV_MAX_SPINS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_SPINS),
            stagnation_limit: env::var(ENV_STAGNATION_LIMIT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STAGNATION_LIMIT),
        }
    }

    /// Create endurance settings with defaults
    pub fn defaults() -> Self {
        Self {
            spin_interval: DEFAULT_SPIN_INTERVAL,
            max_spins: DEFAULT_MAX_SPINS,
            stagnation_limit: DEFAULT_STAGNATION_LIMIT,
        }
    }
}

impl AnalysisSettings {
    /// Create analysis settings from environment variables
    pub fn from_env() -> Self {
        Self {
            similarity_threshold: env::var(ENV_SIMILARITY_THRESHOLD)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
        }
    }

    /// Create analysis settings with defaults
    pub fn defaults() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Get the config base directory (convenience function)
pub fn config_dir() -> String {
    get().paths.config_dir.clone()
}

/// Get the artifact session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().paths.session_dir.clone()
}

/// Get the webhook URL, if configured (convenience function)
pub fn webhook_url() -> Option<String> {
    let url = get().webhook.url.trim().to_string();
    if url.is_empty() { None } else { Some(url) }
}

/// Get the default endurance interval (convenience function)
pub fn spin_interval() -> f64 {
    get().endurance.spin_interval
}

/// Get the default stagnation limit (convenience function)
pub fn stagnation_limit() -> u32 {
    get().endurance.stagnation_limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.paths.config_dir, DEFAULT_CONFIG_DIR);
        assert_eq!(config.paths.session_dir, DEFAULT_SESSION_DIR);
        assert_eq!(config.endurance.max_spins, DEFAULT_MAX_SPINS);
        assert_eq!(config.endurance.stagnation_limit, DEFAULT_STAGNATION_LIMIT);
        assert!(config.webhook.url.is_empty());
    }

    #[test]
    fn test_webhook_defaults_disabled() {
        let settings = WebhookSettings::defaults();
        assert!(settings.url.is_empty());
        assert_eq!(settings.retries, DEFAULT_WEBHOOK_RETRIES);
    }
}
