//! What to do when a human interrupts a run
//!
//! With learning mode on, an interrupt is a chance to teach the supervisor the
//! pattern it should have been waiting for. Supervision resumes with the new
//! pattern set; a match latched before the interrupt still stands.

use super::matcher::{MatchOptions, PatternSet, PatternSpec};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;
use tracing::{debug, warn};

const TTY_PATH: &str = "/dev/tty";

/// Attempts before an unparseable answer counts as "terminate"
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PromptContext {
    pub lines_seen: u64,
    pub elapsed: Duration,
    /// Most recent lines, oldest first
    pub recent: Vec<String>,
    pub options: MatchOptions,
}

#[derive(Debug)]
pub enum PromptOutcome {
    Resume(PatternSet),
    Terminate,
}

#[async_trait]
pub trait InterruptPrompt: Send + Sync {
    async fn on_interrupt(&self, context: &PromptContext) -> PromptOutcome;
}

/// Unattended default: every interrupt terminates
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfirmTerminate;

#[async_trait]
impl InterruptPrompt for ConfirmTerminate {
    async fn on_interrupt(&self, _context: &PromptContext) -> PromptOutcome {
        PromptOutcome::Terminate
    }
}

/// Asks for a replacement pattern on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl InterruptPrompt for TerminalPrompt {
    async fn on_interrupt(&self, context: &PromptContext) -> PromptOutcome {
        let context = context.clone();
        match tokio::task::spawn_blocking(move || ask_on_tty(&context)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("Could not prompt on {}: {}", TTY_PATH, e);
                PromptOutcome::Terminate
            }
            Err(e) => {
                warn!("Prompt task failed: {}", e);
                PromptOutcome::Terminate
            }
        }
    }
}

fn ask_on_tty(context: &PromptContext) -> std::io::Result<PromptOutcome> {
    let tty = OpenOptions::new().read(true).write(true).open(TTY_PATH)?;
    let mut reader = BufReader::new(tty.try_clone()?);
    let mut out = tty;

    writeln!(
        out,
        "\nInterrupted after {} line(s) in {:.1}s.",
        context.lines_seen,
        context.elapsed.as_secs_f64()
    )?;
    if !context.recent.is_empty() {
        writeln!(out, "Recent output:")?;
        for line in &context.recent {
            writeln!(out, "  | {line}")?;
        }
    }

    for _ in 0..MAX_ATTEMPTS {
        write!(out, "Pattern to wait for (empty to stop): ")?;
        out.flush()?;

        let mut answer = String::new();
        if reader.read_line(&mut answer)? == 0 {
            return Ok(PromptOutcome::Terminate);
        }
        match parse_answer(answer.trim(), context.options) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => writeln!(out, "{e}")?,
        }
    }

    Ok(PromptOutcome::Terminate)
}

/// Turn a typed answer into an outcome; empty input confirms termination
pub fn parse_answer(
    answer: &str,
    options: MatchOptions,
) -> Result<PromptOutcome, super::matcher::PatternError> {
    if answer.is_empty() {
        return Ok(PromptOutcome::Terminate);
    }
    let spec = PatternSpec::Single {
        pattern: answer.to_string(),
        invert: false,
    };
    let set = PatternSet::compile(&spec, options)?;
    debug!("Learned pattern `{}`", answer);
    Ok(PromptOutcome::Resume(set))
}
