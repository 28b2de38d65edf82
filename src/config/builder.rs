//! Flag and profile resolution
//!
//! Precedence, lowest to highest: built-in defaults, the `--profile` file,
//! command-line flags. Switches are additive: a flag can turn on what the
//! profile left off but cannot turn off what the profile turned on.

use super::{ConfigError, Profile, WatchConfig};
use crate::cli::Cli;
use crate::subprocess::streaming::ChannelMode;
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder};
use crate::watch::{
    ContextWindow, MatchOptions, PatternConfig, PatternSpec, StuckConfig, TerminationPolicy,
    TimeoutSet, DEFAULT_GRACE,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// A fully resolved invocation
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub watch: WatchConfig,
    /// `None` means watch our own stdin
    pub command: Option<ProcessCommand>,
    pub log_file: Option<PathBuf>,
}

pub fn resolve(cli: &Cli, profile: Option<Profile>) -> Result<RunSettings, ConfigError> {
    let profile = profile.unwrap_or_default();

    let patterns = PatternConfig {
        spec: pattern_spec(cli, &profile)?,
        exclusions: if cli.exclude.is_empty() {
            profile.exclude.clone()
        } else {
            cli.exclude.clone()
        },
        options: MatchOptions {
            ignore_case: cli.ignore_case || profile.ignore_case,
            word: cli.word_regexp || profile.word_regexp,
            whole_line: cli.line_regexp || profile.line_regexp,
        },
    };

    let max_count = cli.max_count.or(profile.max_count).unwrap_or(1);
    if max_count == 0 {
        return Err(ConfigError::ZeroMaxCount);
    }

    let timeouts = TimeoutSet {
        overall: positive("timeout", cli.timeout.or(profile.timeout))?,
        idle: positive("idle-timeout", cli.idle_timeout.or(profile.idle_timeout))?,
        first_output: positive(
            "first-output-timeout",
            cli.first_output_timeout.or(profile.first_output_timeout),
        )?,
        stderr_idle: positive(
            "stderr-idle-timeout",
            cli.stderr_idle_timeout.or(profile.stderr_idle_timeout),
        )?,
    };

    let stuck = match cli.stuck.or(profile.stuck) {
        Some(threshold) if threshold < 2 => return Err(ConfigError::StuckThreshold(threshold)),
        Some(threshold) => Some(StuckConfig {
            threshold,
            normalize_timestamps: cli.normalize_timestamps || profile.normalize_timestamps,
        }),
        None => None,
    };

    let termination = TerminationPolicy {
        detach_on_match: cli.detach || profile.detach,
        detach_on_timeout: cli.detach_on_timeout || profile.detach_on_timeout,
        group: cli.detach_group || profile.detach_group,
        grace: cli.grace.or(profile.grace).unwrap_or(DEFAULT_GRACE),
        context: ContextWindow {
            lines: cli.after_context.or(profile.after_context),
            duration: cli.delay_exit.or(profile.delay_exit),
        },
    };

    let argv = if cli.command.is_empty() {
        &profile.command
    } else {
        &cli.command
    };
    let fds = if cli.fd.is_empty() { &profile.fd } else { &cli.fd };
    let pipe = cli.pipe || profile.pipe;

    let command = match ProcessCommandBuilder::from_argv(argv) {
        Some(builder) => Some(
            builder
                .channel_mode(if pipe {
                    ChannelMode::Pipe
                } else {
                    ChannelMode::Pty
                })
                .extra_fds(fds.iter().copied())
                .build(),
        ),
        None => {
            if !fds.is_empty() {
                return Err(ConfigError::NeedsCommand("fd"));
            }
            if termination.detach_on_match {
                return Err(ConfigError::NeedsCommand("detach"));
            }
            if termination.detach_on_timeout {
                return Err(ConfigError::NeedsCommand("detach-on-timeout"));
            }
            None
        }
    };

    let watch = WatchConfig {
        patterns,
        max_count,
        timeouts,
        stuck,
        termination,
        exit_convention: cli.exit_codes.or(profile.exit_codes).unwrap_or_default(),
        learn: cli.learn || profile.learn,
        quiet: cli.quiet || profile.quiet,
        ..WatchConfig::default()
    };
    debug!("Resolved watch configuration: {:?}", watch);

    Ok(RunSettings {
        watch,
        command,
        log_file: cli.log_file.clone().or(profile.log_file),
    })
}

fn pattern_spec(cli: &Cli, profile: &Profile) -> Result<PatternSpec, ConfigError> {
    let invert = cli.invert_match || profile.invert_match;

    // A pattern source on the command line replaces the profile's entirely.
    let (single, success, error) =
        if cli.pattern.is_some() || cli.success.is_some() || cli.error.is_some() {
            (&cli.pattern, &cli.success, &cli.error)
        } else {
            (&profile.pattern, &profile.success, &profile.error)
        };

    let spec = match (single, success, error) {
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
            return Err(ConfigError::ConflictingPatterns)
        }
        (Some(pattern), None, None) => PatternSpec::Single {
            pattern: pattern.clone(),
            invert,
        },
        (None, Some(success), Some(error)) => PatternSpec::DualSuccessError {
            success: success.clone(),
            error: error.clone(),
        },
        (None, Some(_), None) | (None, None, Some(_)) => return Err(ConfigError::IncompletePair),
        (None, None, None) => PatternSpec::None,
    };

    if invert && !matches!(spec, PatternSpec::Single { .. }) {
        return Err(ConfigError::InvertWithoutPattern);
    }
    Ok(spec)
}

fn positive(
    name: &'static str,
    value: Option<Duration>,
) -> Result<Option<Duration>, ConfigError> {
    match value {
        Some(d) if d.is_zero() => Err(ConfigError::ZeroTimeout(name)),
        other => Ok(other),
    }
}
