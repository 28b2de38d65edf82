//! Configuration
//!
//! Command-line flags and an optional TOML profile are merged and validated
//! into an immutable [`WatchConfig`] before anything is launched. The
//! supervisor never sees raw flags or files.

pub mod builder;
pub mod duration;
pub mod profile;

pub use builder::{resolve, RunSettings};
pub use duration::parse_duration;
pub use profile::Profile;

use crate::watch::{
    ExitConvention, PatternConfig, StuckConfig, TerminationPolicy, TimeoutSet,
};
use std::path::PathBuf;
use std::time::Duration;

/// How long to keep reading after the child exits while descendants still
/// hold its output channels
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read profile {}: {source}", path.display())]
    ReadProfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile {}: {source}", path.display())]
    ParseProfile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid duration `{value}`: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("--success and --error must be given together")]
    IncompletePair,

    #[error("A single pattern cannot be combined with --success/--error")]
    ConflictingPatterns,

    #[error("--invert-match needs a single pattern")]
    InvertWithoutPattern,

    #[error("--stuck needs at least 2 repeats, got {0}")]
    StuckThreshold(usize),

    #[error("--max-count must be at least 1")]
    ZeroMaxCount,

    #[error("--{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("--{0} needs a command to supervise")]
    NeedsCommand(&'static str),
}

/// Everything the supervisor needs to know, resolved and validated
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub patterns: PatternConfig,
    /// Matching lines needed before the match latches
    pub max_count: usize,
    pub timeouts: TimeoutSet,
    pub stuck: Option<StuckConfig>,
    pub termination: TerminationPolicy,
    pub exit_convention: ExitConvention,
    pub learn: bool,
    pub quiet: bool,
    pub drain_timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            patterns: PatternConfig::default(),
            max_count: 1,
            timeouts: TimeoutSet::default(),
            stuck: None,
            termination: TerminationPolicy::default(),
            exit_convention: ExitConvention::default(),
            learn: false,
            quiet: false,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}
