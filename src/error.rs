use crate::config::ConfigError;
use crate::subprocess::ProcessError;
use crate::watch::{codes, PatternError};
use thiserror::Error;

/// Failures that keep a run from starting
#[derive(Error, Debug)]
pub enum LookoutError {
    #[error("{0}")]
    Launch(#[from] ProcessError),

    #[error("{0}")]
    Pattern(#[from] PatternError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LookoutError {
    /// Launch and configuration failures share one exit code
    pub fn exit_code(&self) -> i32 {
        codes::CONFIG_ERROR
    }

    /// Cause identifier printed ahead of the message
    pub fn cause_id(&self) -> &'static str {
        match self {
            LookoutError::Launch(_) => "launch",
            LookoutError::Pattern(_) | LookoutError::Config(_) => "config",
            LookoutError::Io(_) => "io",
        }
    }

    /// Single-line report; multi-line sources such as regex syntax errors are folded
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        let folded = message.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("lookout: {}: {}", self.cause_id(), folded)
    }
}
