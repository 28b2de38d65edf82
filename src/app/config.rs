//! Application configuration
//!
//! Process-wide settings that are not part of a watch: diagnostics only.

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self { verbose }
    }

    /// Get the log filter based on verbosity.
    ///
    /// Quiet by default so diagnostics never interleave with the child's output.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
