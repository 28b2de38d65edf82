//! Watch command implementation
//!
//! Resolves flags and profile, wires the collaborators and runs the
//! supervisor. Returns the exit code for the process.

use crate::cli::Cli;
use crate::config::{resolve, Profile};
use crate::error::LookoutError;
use crate::watch::{
    ConfirmTerminate, InterruptPrompt, JsonlRecorder, NullRecorder, RunRecorder, Source,
    Supervisor, TerminalPrompt,
};
use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supervise the command (or stdin) described by `cli`
pub async fn run_watch_command(cli: Cli) -> Result<i32> {
    let profile = cli
        .profile
        .as_deref()
        .map(Profile::load)
        .transpose()
        .map_err(LookoutError::from)?;
    let settings = resolve(&cli, profile).map_err(LookoutError::from)?;

    let recorder: Arc<dyn RunRecorder> = match &settings.log_file {
        Some(path) => Arc::new(
            JsonlRecorder::open(path)
                .await
                .with_context(|| format!("Cannot record to {}", path.display()))?,
        ),
        None => Arc::new(NullRecorder),
    };

    let prompt: Arc<dyn InterruptPrompt> = if settings.watch.learn {
        Arc::new(TerminalPrompt)
    } else {
        Arc::new(ConfirmTerminate)
    };

    let source = match settings.command {
        Some(command) => Source::Command(command),
        None => {
            if std::io::stdin().is_terminal() {
                warn!("No command given; watching stdin from the terminal");
            }
            debug!("Watching stdin");
            Source::stdin()
        }
    };

    let summary = Supervisor::new(settings.watch, source)
        .with_recorder(recorder)
        .with_prompt(prompt)
        .with_signal_forwarding(true)
        .run()
        .await?;

    if summary.is_abnormal() {
        eprintln!("lookout: {}", summary.describe());
    }
    Ok(summary.exit_code)
}
