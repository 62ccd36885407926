pub mod audio;
pub mod video;
pub mod visual;

pub use audio::{AudioAnalysis, AudioConfig, AudioFrame, AudioProbe};
pub use visual::{SimilarityDetail, StageComparison, StageStatus, compare_images};
