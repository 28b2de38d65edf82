use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to allocate pseudo-terminal: {0}")]
    Pty(#[source] io::Error),

    #[error("Cannot expose descriptor {0}: must be between 3 and 255 and listed once")]
    InvalidDescriptor(i32),

    #[error("Failed to deliver {signal} to {target}: {source}")]
    SignalDelivery {
        signal: &'static str,
        target: i32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    /// Classify a spawn failure so "not found" and "permission denied" stay distinct
    pub fn from_spawn(command: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => ProcessError::CommandNotFound(command.to_string()),
            io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied(command.to_string()),
            _ => ProcessError::Spawn {
                command: command.to_string(),
                source,
            },
        }
    }
}
