//! smartcheck common library
//!
//! Record shapes, configuration, ranking rules and the diff engine shared by
//! the regression runner.

pub mod config;
pub mod consent;
pub mod diff;
pub mod error;
pub mod ranking;
pub mod tables;
pub mod types;

// Re-export commonly used types
pub use config::HarnessConfig;
pub use consent::{ConsentMatrix, ConsentState};
pub use diff::{ComparisonReport, ComparisonRow, DiffEngine, FilterTable, Normalization, Verdict};
pub use error::{Error, Result};
pub use ranking::{
    AccountProfile, DeviceSelection, Direction, MetadataTable, ProductCandidate, RankingChain,
    Recommendation, StoryCatalogue, StoryRecommendation,
};
pub use types::*;

/// smartcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config path
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("smartcheck.toml")
}
