//! Config-file loading: target list, machine backlog, action tables.
//!
//! File layout under the config directory:
//! - `game_config.json` — array of worker targets (URL + optional type)
//! - `machine_codes.csv` — one machine identifier per line, header optional
//! - `actions.json` — keyword-indexed click sequences and special actions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

/// Result type for config loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error types for config loading
#[derive(Debug)]
pub enum ConfigError {
    /// A required file or directory was not found
    Missing(String),

    /// I/O error
    Io(std::io::Error),

    /// JSON parse error
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(what) => write!(f, "Missing config: {}", what),
            ConfigError::Io(err) => write!(f, "I/O error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Missing(_) => None,
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// One worker target: a machine URL and optional manual type override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Lobby/game URL this worker drives
    pub url: String,

    /// Optional pre-assigned machine identifier (single-machine mode)
    #[serde(default)]
    pub identifier: Option<String>,

    /// Optional manual machine type override
    #[serde(default)]
    pub machine_type: Option<String>,

    /// Disabled targets are skipped entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A stagnation-triggered action sequence for one machine family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialAction {
    /// Text labels of the positions to click, in order
    #[serde(default)]
    pub positions: Vec<String>,

    /// Whether to press the take/collect button afterwards
    #[serde(default)]
    pub click_take: bool,
}

/// Keyword-indexed click tables loaded from `actions.json`.
#[derive(Debug, Clone, Default)]
pub struct ActionTables {
    /// Post-entry click sequences, keyed by identifier keyword
    pub keyword_actions: HashMap<String, Vec<String>>,

    /// Stagnation-triggered special actions, keyed by identifier keyword
    pub special_actions: HashMap<String, SpecialAction>,
}

impl ActionTables {
    /// First keyword action whose key appears in `identifier`, if any.
    pub fn keyword_action_for(&self, identifier: &str) -> Option<(&str, &[String])> {
        self.keyword_actions
            .iter()
            .find(|(kw, _)| !kw.is_empty() && identifier.contains(kw.as_str()))
            .map(|(kw, positions)| (kw.as_str(), positions.as_slice()))
    }

    /// First special action whose key appears in `identifier`, if any.
    pub fn special_action_for(&self, identifier: &str) -> Option<(&str, &SpecialAction)> {
        self.special_actions
            .iter()
            .find(|(kw, _)| !kw.is_empty() && identifier.contains(kw.as_str()))
            .map(|(kw, action)| (kw.as_str(), action))
    }
}

/// Read `game_config.json` and return the enabled targets.
pub fn load_targets(base_dir: &Path) -> ConfigResult<Vec<TargetConfig>> {
    let path = base_dir.join("game_config.json");
    let data = fs::read_to_string(&path)
        .map_err(|_| ConfigError::Missing(path.display().to_string()))?;
    let raw: Vec<TargetConfig> = serde_json::from_str(&data)?;

    let targets: Vec<TargetConfig> = raw.into_iter().filter(|t| t.enabled).collect();
    info!("[Config] loaded {} enabled targets from game_config.json", targets.len());
    Ok(targets)
}

/// Read `machine_codes.csv` and return the ordered backlog.
///
/// The file is a single column of identifiers; a header row named
/// `identifier` or `machine_code` is skipped. A missing file is not an
/// error — it just means single-machine mode.
pub fn load_backlog(base_dir: &Path) -> Vec<String> {
    let path = base_dir.join("machine_codes.csv");
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(_) => {
            warn!("[Config] {} not found, no shared backlog", path.display());
            return Vec::new();
        }
    };

    let mut codes = Vec::new();
    for (i, line) in data.lines().enumerate() {
        let code = line.split(',').next().unwrap_or("").trim();
        if code.is_empty() {
            continue;
        }
        if i == 0 && matches!(code.to_ascii_lowercase().as_str(), "identifier" | "machine_code") {
            continue;
        }
        codes.push(code.to_string());
    }

    info!("[Config] loaded {} machine identifiers from machine_codes.csv", codes.len());
    codes
}

/// Read `actions.json` into keyword and special action tables.
///
/// A missing file yields empty tables — actions are optional per floor.
pub fn load_actions(base_dir: &Path) -> ConfigResult<ActionTables> {
    let path = base_dir.join("actions.json");
    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(_) => {
            info!("[Config] {} not found, no action tables", path.display());
            return Ok(ActionTables::default());
        }
    };

    #[derive(Deserialize)]
    struct RawActions {
        #[serde(default)]
        keyword_actions: HashMap<String, Vec<String>>,
        #[serde(default)]
        special_actions: HashMap<String, SpecialAction>,
    }

    let raw: RawActions = serde_json::from_str(&data)?;
    Ok(ActionTables {
        keyword_actions: raw.keyword_actions,
        special_actions: raw.special_actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_backlog_skips_header_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("machine_codes.csv")).unwrap();
        writeln!(file, "identifier").unwrap();
        writeln!(file, "873-JJBX-0004").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "873-DFDC-0140,extra").unwrap();

        let codes = load_backlog(dir.path());
        assert_eq!(codes, vec!["873-JJBX-0004", "873-DFDC-0140"]);
    }

    #[test]
    fn test_load_backlog_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_backlog(dir.path()).is_empty());
    }

    #[test]
    fn test_load_targets_filters_disabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("game_config.json"),
            r#"[
                {"url": "http://a", "enabled": true},
                {"url": "http://b", "enabled": false},
                {"url": "http://c", "machine_type": "JJBX"}
            ]"#,
        )
        .unwrap();

        let targets = load_targets(dir.path()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url, "http://a");
        assert_eq!(targets[1].machine_type.as_deref(), Some("JJBX"));
    }

    #[test]
    fn test_load_actions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("actions.json"),
            r#"{
                "keyword_actions": {"JJBX": ["X1", "X2"]},
                "special_actions": {"JJBX": {"positions": ["X3"], "click_take": true}}
            }"#,
        )
        .unwrap();

        let tables = load_actions(dir.path()).unwrap();
        let (kw, positions) = tables.keyword_action_for("873-JJBX-0004").unwrap();
        assert_eq!(kw, "JJBX");
        assert_eq!(positions, ["X1".to_string(), "X2".to_string()]);

        let (_, action) = tables.special_action_for("873-JJBX-0004").unwrap();
        assert!(action.click_take);
        assert!(tables.special_action_for("873-NONE-0001").is_none());
    }
}
