//! Profile catalog loading from a folder structure.
//!
//! Expected layout:
//!
//! ```text
//! machine_profiles/
//!     JJBX/
//!         config.json
//!         test_flows.json      (optional, overrides config.json flows)
//!         audio_config.json    (optional)
//!         reference_images/    (optional, per-stage subdirectories)
//!     DFDC/
//!         config.json
//!     _default/
//!         audio_config.json    (shared audio defaults, not a profile)
//! ```

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::loader::{ConfigError, ConfigResult};
use crate::profile::types::{Profile, ProfileCatalog, TestFlowStep};

/// Load a single profile from its folder. Returns `None` when the folder
/// has no `config.json` or the file fails to parse — a broken profile must
/// not take down the rest of the catalog.
pub fn load_profile_from_folder(profile_dir: &Path) -> Option<Profile> {
    let config_file = profile_dir.join("config.json");
    if !config_file.exists() {
        warn!("[ProfileCatalog] no config.json in {}", profile_dir.display());
        return None;
    }

    let data = match fs::read_to_string(&config_file) {
        Ok(data) => data,
        Err(err) => {
            warn!("[ProfileCatalog] failed to read {}: {}", config_file.display(), err);
            return None;
        }
    };

    let mut profile: Profile = match serde_json::from_str(&data) {
        Ok(profile) => profile,
        Err(err) => {
            warn!("[ProfileCatalog] failed to parse {}: {}", config_file.display(), err);
            return None;
        }
    };

    if profile.name.is_empty() {
        profile.name = profile_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
    }

    // A separate test_flows.json overrides flows declared in config.json.
    let flows_file = profile_dir.join("test_flows.json");
    if flows_file.exists() {
        match fs::read_to_string(&flows_file)
            .map_err(|e| e.to_string())
            .and_then(|data| parse_flows(&data).map_err(|e| e.to_string()))
        {
            Ok(flows) => profile.test_flows = flows,
            Err(err) => {
                warn!("[ProfileCatalog] failed to parse {}: {}", flows_file.display(), err);
            }
        }
    }

    profile.folder_path = Some(profile_dir.to_path_buf());
    info!(
        "[ProfileCatalog] loaded profile {} (from {})",
        profile.name,
        profile_dir.display()
    );
    Some(profile)
}

/// Parse a `test_flows.json` document: `{"test_flows": [...]}` with
/// `{"flows": [...]}` accepted as a legacy key.
///
/// Flow entries may declare `image_comparison` beside `config` instead of
/// inside it; it is merged into the step config so lookups have one home.
fn parse_flows(data: &str) -> ConfigResult<Vec<TestFlowStep>> {
    let value: serde_json::Value = serde_json::from_str(data)?;
    let list = value
        .get("test_flows")
        .or_else(|| value.get("flows"))
        .cloned()
        .ok_or_else(|| ConfigError::Missing("test_flows".to_string()))?;

    let entries: Vec<serde_json::Value> = serde_json::from_value(list)?;
    let mut flows = Vec::with_capacity(entries.len());
    for mut entry in entries {
        hoist_image_comparison(&mut entry);
        flows.push(serde_json::from_value(entry)?);
    }
    Ok(flows)
}

fn hoist_image_comparison(entry: &mut serde_json::Value) {
    let serde_json::Value::Object(map) = entry else { return };
    let Some(comparison) = map.get("image_comparison").cloned() else { return };
    let config = map
        .entry("config".to_string())
        .or_insert_with(|| serde_json::json!({}));
    if let serde_json::Value::Object(config) = config {
        config
            .entry("image_comparison".to_string())
            .or_insert(comparison);
    }
    map.remove("image_comparison");
}

/// Load all machine profiles from `<base_dir>/machine_profiles/`.
///
/// Hidden folders and `_default` (shared audio config, not a profile) are
/// skipped. Keys are uppercase folder names; a folder named `default`
/// becomes the catalog's default profile.
pub fn load_catalog(base_dir: &Path) -> ProfileCatalog {
    let profiles_dir = base_dir.join("machine_profiles");

    if !profiles_dir.exists() {
        warn!("[ProfileCatalog] profile directory not found: {}", profiles_dir.display());
        return ProfileCatalog {
            profiles_dir: Some(profiles_dir),
            ..ProfileCatalog::default()
        };
    }

    let mut catalog = ProfileCatalog {
        profiles_dir: Some(profiles_dir.clone()),
        ..ProfileCatalog::default()
    };

    let entries = match fs::read_dir(&profiles_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("[ProfileCatalog] cannot read {}: {}", profiles_dir.display(), err);
            return catalog;
        }
    };

    let mut dirs: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }

        if let Some(profile) = load_profile_from_folder(&dir) {
            let key = name.to_ascii_uppercase();
            if name.eq_ignore_ascii_case("default") {
                catalog.default_profile = Some(key.clone());
            }
            catalog.profiles.insert(key, profile);
        }
    }

    if catalog.default_profile.is_none() {
        if let Some(first) = catalog.profiles.keys().min().cloned() {
            info!("[ProfileCatalog] no default profile, using {} as default", first);
            catalog.default_profile = Some(first);
        }
    }

    info!("[ProfileCatalog] loaded {} machine profiles", catalog.len());
    catalog
}
