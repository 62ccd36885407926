//! Test-scenario overrides applied uniformly to every worker in a run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

/// Feature toggles for a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFeatures {
    /// Run the exit flow after each machine
    #[serde(default = "default_true")]
    pub enable_exit_flow: bool,

    /// Allow the stagnation-triggered special action sequence
    #[serde(default = "default_true")]
    pub enable_special_actions: bool,
}

impl Default for TestFeatures {
    fn default() -> Self {
        Self {
            enable_exit_flow: true,
            enable_special_actions: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_spin_interval() -> f64 {
    1.0
}

fn default_balance_threshold() -> i64 {
    20_000
}

/// One named scenario: endurance bounds and feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestScenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub features: TestFeatures,

    /// Maximum spins per machine; `None` means unlimited
    #[serde(default)]
    pub spin_count: Option<u32>,

    /// Target endurance-loop interval in seconds
    #[serde(default = "default_spin_interval")]
    pub spin_interval: f64,

    /// Balance below which the exit-and-reenter flow triggers
    #[serde(default = "default_balance_threshold")]
    pub balance_threshold: i64,

    /// End the spin loop after this many spins (exit-flow testing)
    #[serde(default)]
    pub exit_after_spins: Option<u32>,

    /// Whitelist of flow-step names to run; `None` runs all declared steps
    #[serde(default)]
    pub test_flows: Option<Vec<String>>,
}

/// Top-level test configuration: which scenario (if any) is active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default)]
    pub test_mode: bool,

    #[serde(default)]
    pub active_scenario: Option<String>,

    #[serde(default, rename = "test_scenarios")]
    pub scenarios: HashMap<String, TestScenario>,
}

impl TestConfig {
    /// The active scenario, when test mode is on and the name resolves.
    pub fn active(&self) -> Option<&TestScenario> {
        if !self.test_mode {
            return None;
        }
        let key = self.active_scenario.as_deref()?;
        match self.scenarios.get(key) {
            Some(scenario) => Some(scenario),
            None => {
                warn!("[TestConfig] scenario '{}' not defined, running normal mode", key);
                None
            }
        }
    }
}

/// Read `test_config.json`; any failure falls back to the default config.
pub fn load_test_config(base_dir: &Path) -> TestConfig {
    let path = base_dir.join("test_config.json");
    if !path.exists() {
        info!("[TestConfig] test_config.json not found, using defaults");
        return TestConfig::default();
    }

    match fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|data| {
        serde_json::from_str::<TestConfig>(&data).map_err(|e| e.to_string())
    }) {
        Ok(config) => {
            if let Some(scenario) = config.active() {
                info!("[TestConfig] test mode active, scenario: {}", scenario.name);
            }
            config
        }
        Err(err) => {
            warn!("[TestConfig] failed to read test_config.json: {}", err);
            TestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requires_test_mode() {
        let mut config = TestConfig::default();
        config.scenarios.insert(
            "smoke".into(),
            serde_json::from_str(r#"{"name": "smoke"}"#).unwrap(),
        );
        config.active_scenario = Some("smoke".into());
        assert!(config.active().is_none());

        config.test_mode = true;
        assert_eq!(config.active().map(|s| s.name.as_str()), Some("smoke"));
    }

    #[test]
    fn test_unknown_scenario_is_none() {
        let config = TestConfig {
            test_mode: true,
            active_scenario: Some("missing".into()),
            scenarios: HashMap::new(),
        };
        assert!(config.active().is_none());
    }

    #[test]
    fn test_scenario_defaults() {
        let scenario: TestScenario = serde_json::from_str(r#"{"name": "s"}"#).unwrap();
        assert!(scenario.enabled);
        assert!(scenario.spin_count.is_none());
        assert_eq!(scenario.spin_interval, 1.0);
        assert!(scenario.features.enable_special_actions);
        assert!(scenario.test_flows.is_none());
    }
}
