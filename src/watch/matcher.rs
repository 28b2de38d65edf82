//! Pattern matching over supervised output
//!
//! Exclusions are tested first and short-circuit. A dual success/error set
//! checks the success pattern first, so a line matching both counts as a
//! success. The first match of the run is latched and never replaced.

use crate::subprocess::streaming::{ChannelId, LineEvent};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Empty {role} pattern")]
    Empty { role: &'static str },

    #[error("Invalid {role} pattern `{pattern}`: {source}")]
    Invalid {
        role: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Uncompiled pattern shape as it comes from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PatternSpec {
    #[default]
    None,
    Single {
        pattern: String,
        invert: bool,
    },
    DualSuccessError {
        success: String,
        error: String,
    },
}

/// Pattern modifiers. Exclusions only follow `ignore_case`; the word and
/// whole-line wrapping applies to match patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub ignore_case: bool,
    /// Only match whole words (`\b...\b`)
    pub word: bool,
    /// Only match the entire line (`^...$`)
    pub whole_line: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternConfig {
    pub spec: PatternSpec,
    pub exclusions: Vec<String>,
    pub options: MatchOptions,
}

/// Compiled, immutable pattern set
#[derive(Debug, Clone)]
pub enum PatternSet {
    None,
    Single { regex: Regex, invert: bool },
    DualSuccessError { success: Regex, error: Regex },
}

impl PatternSet {
    pub fn compile(spec: &PatternSpec, options: MatchOptions) -> Result<Self, PatternError> {
        Ok(match spec {
            PatternSpec::None => PatternSet::None,
            PatternSpec::Single { pattern, invert } => PatternSet::Single {
                regex: compile("match", pattern, options)?,
                invert: *invert,
            },
            PatternSpec::DualSuccessError { success, error } => PatternSet::DualSuccessError {
                success: compile("success", success, options)?,
                error: compile("error", error, options)?,
            },
        })
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PatternSet::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Success,
    Error,
    Single,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Success => write!(f, "success"),
            MatchKind::Error => write!(f, "error"),
            MatchKind::Single => write!(f, "single"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Excluded,
    NoMatch,
    Match { kind: MatchKind, matched: String },
}

/// The first match of a run
#[derive(Debug, Clone)]
pub struct MatchEvent {
    pub channel: ChannelId,
    pub line: String,
    pub matched: String,
    pub line_number: u64,
    pub kind: MatchKind,
    pub at: Instant,
}

pub struct PatternMatcher {
    patterns: PatternSet,
    exclusions: Vec<Regex>,
    options: MatchOptions,
    latched: Option<MatchEvent>,
    matches: usize,
}

impl PatternMatcher {
    pub fn new(config: &PatternConfig) -> Result<Self, PatternError> {
        let exclusion_options = MatchOptions {
            ignore_case: config.options.ignore_case,
            ..Default::default()
        };
        let exclusions = config
            .exclusions
            .iter()
            .map(|p| compile("exclude", p, exclusion_options))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns: PatternSet::compile(&config.spec, config.options)?,
            exclusions,
            options: config.options,
            latched: None,
            matches: 0,
        })
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    /// Classify one line without touching match state
    pub fn evaluate(&self, line: &str) -> Evaluation {
        if self.exclusions.iter().any(|r| r.is_match(line)) {
            return Evaluation::Excluded;
        }

        match &self.patterns {
            PatternSet::None => Evaluation::NoMatch,
            PatternSet::Single { regex, invert } => match (regex.find(line), invert) {
                (Some(m), false) => Evaluation::Match {
                    kind: MatchKind::Single,
                    matched: m.as_str().to_string(),
                },
                (None, true) => Evaluation::Match {
                    kind: MatchKind::Single,
                    matched: line.to_string(),
                },
                _ => Evaluation::NoMatch,
            },
            PatternSet::DualSuccessError { success, error } => {
                if let Some(m) = success.find(line) {
                    Evaluation::Match {
                        kind: MatchKind::Success,
                        matched: m.as_str().to_string(),
                    }
                } else if let Some(m) = error.find(line) {
                    Evaluation::Match {
                        kind: MatchKind::Error,
                        matched: m.as_str().to_string(),
                    }
                } else {
                    Evaluation::NoMatch
                }
            }
        }
    }

    /// Evaluate a delivered line, counting matches and latching the first.
    pub fn observe(&mut self, line: &LineEvent) -> Evaluation {
        let evaluation = self.evaluate(&line.text);
        if let Evaluation::Match { kind, matched } = &evaluation {
            self.matches += 1;
            if self.latched.is_none() {
                self.latched = Some(MatchEvent {
                    channel: line.channel,
                    line: line.text.clone(),
                    matched: matched.clone(),
                    line_number: line.number,
                    kind: *kind,
                    at: line.at,
                });
            }
        }
        evaluation
    }

    pub fn latched(&self) -> Option<&MatchEvent> {
        self.latched.as_ref()
    }

    pub fn match_count(&self) -> usize {
        self.matches
    }

    /// Swap in a new pattern set, e.g. one taught after an interrupt.
    /// An already latched match is kept.
    pub fn replace(&mut self, patterns: PatternSet) {
        self.patterns = patterns;
    }
}

fn compile(role: &'static str, pattern: &str, options: MatchOptions) -> Result<Regex, PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::Empty { role });
    }

    let wrapped = if options.whole_line {
        format!("^(?:{pattern})$")
    } else if options.word {
        format!(r"\b(?:{pattern})\b")
    } else {
        pattern.to_string()
    };

    RegexBuilder::new(&wrapped)
        .case_insensitive(options.ignore_case)
        .build()
        .map_err(|source| PatternError::Invalid {
            role,
            pattern: pattern.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(pattern: &str) -> PatternConfig {
        PatternConfig {
            spec: PatternSpec::Single {
                pattern: pattern.to_string(),
                invert: false,
            },
            ..Default::default()
        }
    }

    fn dual(success: &str, error: &str) -> PatternConfig {
        PatternConfig {
            spec: PatternSpec::DualSuccessError {
                success: success.to_string(),
                error: error.to_string(),
            },
            ..Default::default()
        }
    }

    fn line(text: &str, number: u64) -> LineEvent {
        LineEvent {
            channel: ChannelId::Stdout,
            text: text.to_string(),
            number,
            at: Instant::now(),
        }
    }

    fn is_match(evaluation: &Evaluation) -> bool {
        matches!(evaluation, Evaluation::Match { .. })
    }

    #[test]
    fn test_single_pattern_reports_matched_substring() {
        let matcher = PatternMatcher::new(&single("ERR[A-Z]+")).unwrap();
        assert_eq!(
            matcher.evaluate("step 3: ERROR disk full"),
            Evaluation::Match {
                kind: MatchKind::Single,
                matched: "ERROR".to_string()
            }
        );
        assert_eq!(matcher.evaluate("all good"), Evaluation::NoMatch);
    }

    #[test]
    fn test_empty_pattern_is_rejected() {
        let result = PatternMatcher::new(&single(""));
        assert!(matches!(result, Err(PatternError::Empty { role: "match" })));

        let result = PatternMatcher::new(&dual("ok", ""));
        assert!(matches!(result, Err(PatternError::Empty { role: "error" })));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let result = PatternMatcher::new(&single("("));
        assert!(matches!(result, Err(PatternError::Invalid { .. })));
    }

    #[test]
    fn test_exclusion_short_circuits() {
        let mut config = single("ERROR");
        config.exclusions = vec!["expected".to_string()];
        let matcher = PatternMatcher::new(&config).unwrap();

        assert_eq!(
            matcher.evaluate("ERROR (expected, retrying)"),
            Evaluation::Excluded
        );
        assert!(is_match(&matcher.evaluate("ERROR for real")));
    }

    #[test]
    fn test_unused_exclusion_changes_nothing() {
        let plain = PatternMatcher::new(&single("fail")).unwrap();
        let mut config = single("fail");
        config.exclusions = vec!["zzz-never-printed".to_string()];
        let excluded = PatternMatcher::new(&config).unwrap();

        for text in ["ok", "step failed", "fail fast", ""] {
            assert_eq!(plain.evaluate(text), excluded.evaluate(text));
        }
    }

    #[test]
    fn test_dual_prefers_success_on_same_line() {
        let matcher = PatternMatcher::new(&dual("done", "error")).unwrap();
        assert!(matches!(
            matcher.evaluate("done with 0 error(s)"),
            Evaluation::Match {
                kind: MatchKind::Success,
                ..
            }
        ));
        assert!(matches!(
            matcher.evaluate("fatal error"),
            Evaluation::Match {
                kind: MatchKind::Error,
                ..
            }
        ));
    }

    #[test]
    fn test_first_match_wins_for_the_run() {
        let mut matcher = PatternMatcher::new(&dual("ok", "ERROR")).unwrap();
        matcher.observe(&line("ok", 1));
        matcher.observe(&line("ERROR", 2));
        matcher.observe(&line("ok", 3));

        let latched = matcher.latched().unwrap();
        assert_eq!(latched.kind, MatchKind::Success);
        assert_eq!(latched.line_number, 1);
        assert_eq!(matcher.match_count(), 3);
    }

    #[test]
    fn test_invert_matches_lines_without_pattern() {
        let config = PatternConfig {
            spec: PatternSpec::Single {
                pattern: "heartbeat".to_string(),
                invert: true,
            },
            ..Default::default()
        };
        let matcher = PatternMatcher::new(&config).unwrap();
        assert_eq!(matcher.evaluate("heartbeat 42"), Evaluation::NoMatch);
        assert_eq!(
            matcher.evaluate("something else"),
            Evaluation::Match {
                kind: MatchKind::Single,
                matched: "something else".to_string()
            }
        );
    }

    #[test]
    fn test_case_insensitive_applies_to_exclusions() {
        let config = PatternConfig {
            spec: PatternSpec::Single {
                pattern: "error".to_string(),
                invert: false,
            },
            exclusions: vec!["warning".to_string()],
            options: MatchOptions {
                ignore_case: true,
                ..Default::default()
            },
        };
        let matcher = PatternMatcher::new(&config).unwrap();
        assert!(is_match(&matcher.evaluate("ERROR")));
        assert_eq!(matcher.evaluate("WARNING: error"), Evaluation::Excluded);
    }

    #[test]
    fn test_word_and_whole_line_wrapping() {
        let mut config = single("fail");
        config.options.word = true;
        let word = PatternMatcher::new(&config).unwrap();
        assert!(is_match(&word.evaluate("it will fail now")));
        assert!(!is_match(&word.evaluate("failure")));

        config.options.whole_line = true;
        let whole = PatternMatcher::new(&config).unwrap();
        assert!(is_match(&whole.evaluate("fail")));
        assert!(!is_match(&whole.evaluate("fail now")));
    }

    #[test]
    fn test_exclusions_are_not_wrapped() {
        let mut config = single("error");
        config.exclusions = vec!["expect".to_string()];
        config.options.word = true;
        let word = PatternMatcher::new(&config).unwrap();
        assert_eq!(word.evaluate("error expected here"), Evaluation::Excluded);
        assert!(is_match(&word.evaluate("error in module")));

        let mut config = single("ERROR.*");
        config.exclusions = vec!["DEBUG".to_string()];
        config.options.whole_line = true;
        let whole = PatternMatcher::new(&config).unwrap();
        assert_eq!(whole.evaluate("ERROR while DEBUG logging"), Evaluation::Excluded);
        assert!(is_match(&whole.evaluate("ERROR disk full")));
    }

    #[test]
    fn test_no_pattern_never_matches() {
        let matcher = PatternMatcher::new(&PatternConfig::default()).unwrap();
        assert_eq!(matcher.evaluate("anything"), Evaluation::NoMatch);
    }

    #[test]
    fn test_replace_keeps_latched_match() {
        let mut matcher = PatternMatcher::new(&single("first")).unwrap();
        matcher.observe(&line("first", 1));
        let replacement = PatternSet::compile(
            &PatternSpec::Single {
                pattern: "second".to_string(),
                invert: false,
            },
            MatchOptions::default(),
        )
        .unwrap();
        matcher.replace(replacement);
        matcher.observe(&line("second", 2));
        assert_eq!(matcher.latched().unwrap().line_number, 1);
        assert!(is_match(&matcher.evaluate("second")));
    }
}
