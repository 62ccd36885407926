//! Machine profile types: what to test for one family of machines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A single step in a profile's test flow.
///
/// Steps execute in declared order. The nested `config` value carries
/// step-specific settings and may include an `image_comparison` sub-config
/// that attaches a reference-image check to the step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestFlowStep {
    /// Step name, dispatched via [`StepKind::from_name`]
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this step runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-step locate/wait timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Retry budget for flaky UI interactions within the step
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Arbitrary nested step configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> f64 {
    10.0
}

fn default_retry_count() -> u32 {
    3
}

impl TestFlowStep {
    /// Create a bare step with the given name and defaults everywhere else.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enabled: true,
            timeout: default_timeout(),
            retry_count: default_retry_count(),
            config: serde_json::Value::Null,
        }
    }

    /// The image-comparison sub-config attached to this step, if enabled.
    pub fn image_comparison(&self) -> Option<&serde_json::Value> {
        let cfg = self.config.get("image_comparison")?;
        if cfg.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false) {
            Some(cfg)
        } else {
            None
        }
    }
}

/// Closed dispatch over test-flow-step names.
///
/// Unknown names are preserved rather than rejected: an unknown step is
/// logged and skipped, but its attached image-comparison sub-check still
/// runs if configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Entry verification (navigation already happened; runs entry checks)
    Entry,
    /// Video/canvas frame-health check
    Video,
    /// Button response check
    Buttons,
    /// Bet simulation
    Betting,
    /// Special-feature probe (free spins and similar)
    SpecialFeature,
    /// Grand-feature probe (jackpot tiers)
    GrandFeature,
    /// Audio quality check
    Audio,
    /// Anything else; carries the original name
    Unknown(String),
}

impl StepKind {
    /// Resolve a step name to its dispatch arm (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "entry" | "entry_verification" => StepKind::Entry,
            "video" | "video_check" => StepKind::Video,
            "buttons" | "button_test" => StepKind::Buttons,
            "betting" | "bet_test" => StepKind::Betting,
            "special" | "special_features" => StepKind::SpecialFeature,
            "grand" | "grand_features" => StepKind::GrandFeature,
            "audio" | "audio_check" => StepKind::Audio,
            _ => StepKind::Unknown(name.to_string()),
        }
    }

    /// Stage name used for reference-image directories and report entries.
    pub fn stage_name(&self) -> String {
        match self {
            StepKind::Entry => "entry".to_string(),
            StepKind::Video => "video".to_string(),
            StepKind::Buttons => "buttons".to_string(),
            StepKind::Betting => "betting".to_string(),
            StepKind::SpecialFeature => "special".to_string(),
            StepKind::GrandFeature => "grand".to_string(),
            StepKind::Audio => "audio".to_string(),
            StepKind::Unknown(name) => name.trim().to_ascii_lowercase().replace(' ', "_"),
        }
    }
}

/// Identification rules used for automatic profile matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRules {
    /// Substrings matched against the full machine identifier
    #[serde(default)]
    pub identifier_patterns: Vec<String>,

    /// Device ids (from the URL's `gameid` parameter) owned by this profile
    #[serde(default)]
    pub device_ids: Vec<String>,

    /// Substrings matched against the machine URL
    #[serde(default)]
    pub url_patterns: Vec<String>,
}

/// Configuration bundle describing how to test one family of machines.
///
/// Loaded once at startup from a profile folder; read-only during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name (usually the family keyword, e.g. "JJBX")
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Disabled profiles are skipped by keyword/pattern matching
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Automatic-matching rules
    #[serde(default)]
    pub match_rules: MatchRules,

    /// Ordered test flow; empty means the default sequence runs
    #[serde(default)]
    pub test_flows: Vec<TestFlowStep>,

    /// Named button locators, e.g. {"spin": ".my-button.btn_spin"}
    #[serde(default)]
    pub button_locators: HashMap<String, String>,

    /// Button-test configuration (button list, highlight detection)
    #[serde(default)]
    pub button_test_config: serde_json::Value,

    /// Video-detection thresholds and element locator
    #[serde(default)]
    pub video_detection: serde_json::Value,

    /// Free-form profile-specific settings
    #[serde(default)]
    pub special_config: serde_json::Value,

    /// Folder this profile was loaded from (reference images, audio config)
    #[serde(skip)]
    pub folder_path: Option<PathBuf>,
}

impl Profile {
    /// Create a minimal enabled profile (used by tests and the simulator).
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enabled: true,
            match_rules: MatchRules::default(),
            test_flows: Vec::new(),
            button_locators: HashMap::new(),
            button_test_config: serde_json::Value::Null,
            video_detection: serde_json::Value::Null,
            special_config: serde_json::Value::Null,
            folder_path: None,
        }
    }

    /// Root of this profile's reference images, when loaded from disk.
    pub fn reference_images_dir(&self) -> Option<PathBuf> {
        self.folder_path.as_ref().map(|p| p.join("reference_images"))
    }
}

/// The full set of machine profiles, keyed by uppercase family keyword.
#[derive(Debug, Clone, Default)]
pub struct ProfileCatalog {
    /// Profiles keyed by uppercase folder name
    pub profiles: HashMap<String, Profile>,
    /// Key of the default profile, if one exists
    pub default_profile: Option<String>,
    /// Directory the catalog was loaded from
    pub profiles_dir: Option<PathBuf>,
}

impl ProfileCatalog {
    /// Build a catalog from a list of profiles, keying by uppercase name.
    pub fn from_profiles(profiles: Vec<Profile>) -> Self {
        let mut map = HashMap::new();
        for profile in profiles {
            map.insert(profile.name.to_ascii_uppercase(), profile);
        }
        let default_profile = map.keys().find(|k| *k == "DEFAULT").cloned();
        Self {
            profiles: map,
            default_profile,
            profiles_dir: None,
        }
    }

    /// Look up a profile by key, case-insensitively.
    pub fn get(&self, key: &str) -> Option<&Profile> {
        self.profiles.get(&key.to_ascii_uppercase())
    }

    /// Iterate `(key, profile)` pairs for enabled profiles only.
    pub fn enabled(&self) -> impl Iterator<Item = (&String, &Profile)> {
        self.profiles.iter().filter(|(_, p)| p.enabled)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_dispatch() {
        assert_eq!(StepKind::from_name("entry"), StepKind::Entry);
        assert_eq!(StepKind::from_name("Video"), StepKind::Video);
        assert_eq!(StepKind::from_name("BUTTONS"), StepKind::Buttons);
        assert_eq!(StepKind::from_name("audio_check"), StepKind::Audio);
        assert_eq!(
            StepKind::from_name("mystery flow"),
            StepKind::Unknown("mystery flow".to_string())
        );
    }

    #[test]
    fn test_unknown_stage_name_normalized() {
        let kind = StepKind::from_name("Mystery Flow");
        assert_eq!(kind.stage_name(), "mystery_flow");
    }

    #[test]
    fn test_image_comparison_requires_enabled() {
        let mut step = TestFlowStep::named("video");
        step.config = serde_json::json!({"image_comparison": {"enabled": false}});
        assert!(step.image_comparison().is_none());

        step.config = serde_json::json!({"image_comparison": {"enabled": true, "threshold": 0.9}});
        let cfg = step.image_comparison().expect("enabled comparison");
        assert_eq!(cfg.get("threshold").and_then(|v| v.as_f64()), Some(0.9));
    }

    #[test]
    fn test_catalog_lookup_case_insensitive() {
        let catalog = ProfileCatalog::from_profiles(vec![Profile::named("JJBX")]);
        assert!(catalog.get("jjbx").is_some());
        assert!(catalog.get("JJBX").is_some());
        assert!(catalog.get("DFDC").is_none());
    }
}
