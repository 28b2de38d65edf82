//! CLI argument structures

use crate::config::parse_duration;
use crate::watch::ExitConvention;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Watch a command's output and stop waiting at the right moment
#[derive(Parser, Debug, Default)]
#[command(name = "lookout")]
#[command(
    about = "lookout - watch a command's output live and decide when to stop waiting",
    long_about = None
)]
#[command(version)]
#[command(override_usage = "lookout [OPTIONS] [PATTERN] [-- COMMAND...]")]
pub struct Cli {
    /// Pattern to wait for (regular expression)
    #[arg(value_name = "PATTERN", conflicts_with_all = ["success", "error"])]
    pub pattern: Option<String>,

    /// Command to run and supervise; without one, stdin is watched
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,

    /// Pattern that means the command succeeded
    #[arg(long, value_name = "PATTERN", requires = "error")]
    pub success: Option<String>,

    /// Pattern that means the command failed
    #[arg(long, value_name = "PATTERN", requires = "success")]
    pub error: Option<String>,

    /// Ignore lines matching this pattern (repeatable)
    #[arg(short = 'e', long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Match lines that do NOT contain the pattern
    #[arg(short = 'v', long)]
    pub invert_match: bool,

    /// Case-insensitive matching, exclusions included
    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    /// Match whole words only
    #[arg(short = 'w', long)]
    pub word_regexp: bool,

    /// Match whole lines only
    #[arg(short = 'x', long)]
    pub line_regexp: bool,

    /// Stop after this many matching lines
    #[arg(short = 'm', long, value_name = "N")]
    pub max_count: Option<usize>,

    /// Give up after this long in total (e.g. 30s, 10m)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Give up after this long without any output
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub idle_timeout: Option<Duration>,

    /// Give up if nothing at all is printed within this long
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub first_output_timeout: Option<Duration>,

    /// Give up after stderr has been quiet this long, once it has printed
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub stderr_idle_timeout: Option<Duration>,

    /// Treat N identical lines in a row as stuck
    #[arg(long, value_name = "N")]
    pub stuck: Option<usize>,

    /// Ignore timestamps and dates when comparing lines for --stuck
    #[arg(long)]
    pub normalize_timestamps: bool,

    /// Keep showing N lines after a match before stopping
    #[arg(short = 'A', long, value_name = "N")]
    pub after_context: Option<usize>,

    /// Keep showing output this long after a match before stopping
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub delay_exit: Option<Duration>,

    /// Leave the command running after a match
    #[arg(long)]
    pub detach: bool,

    /// Leave the command running after a timeout
    #[arg(long)]
    pub detach_on_timeout: bool,

    /// Signal the command's whole process group when stopping it
    #[arg(long)]
    pub detach_group: bool,

    /// Time between SIGTERM and SIGKILL (0 kills immediately)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub grace: Option<Duration>,

    /// Exit code convention
    #[arg(long, value_enum, value_name = "CONVENTION")]
    pub exit_codes: Option<ExitConvention>,

    /// Connect the command's output through pipes instead of terminals
    #[arg(long)]
    pub pipe: bool,

    /// Also watch descriptor N of the command (repeatable)
    #[arg(long = "fd", value_name = "N")]
    pub fd: Vec<i32>,

    /// Append every line and the outcome to this file as JSON lines
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Load options from a TOML profile
    #[arg(long, value_name = "PATH")]
    pub profile: Option<PathBuf>,

    /// On Ctrl-C, ask for the pattern that should have been waited for
    #[arg(long)]
    pub learn: bool,

    /// Do not echo the command's output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Diagnostic output on stderr (repeat for more)
    #[arg(long, action = ArgAction::Count)]
    pub verbose: u8,
}
