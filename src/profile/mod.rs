pub mod loader;
pub mod matcher;
pub mod types;

pub use loader::load_catalog;
pub use matcher::{extract_family_keyword, match_profile};
pub use types::{MatchRules, Profile, ProfileCatalog, StepKind, TestFlowStep};
