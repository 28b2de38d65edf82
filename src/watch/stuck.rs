//! Stuck detection: output keeps arriving but says the same thing
//!
//! Each channel keeps a small ring of recent lines. When the newest
//! `threshold` lines on one channel are identical the child is considered
//! alive but not progressing.

use crate::subprocess::streaming::ChannelId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};

/// Minimum ring size per channel
pub const DEFAULT_WINDOW: usize = 5;

static ISO_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("valid timestamp regex")
});
static BRACKETED_CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\d{1,2}:\d{2}:\d{2}(?:[.,]\d+)?\]").expect("valid clock regex")
});
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("valid date regex"));
static EPOCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{13}|\d{10})\b").expect("valid epoch regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckConfig {
    /// Consecutive identical lines that count as stuck (at least 2)
    pub threshold: usize,
    pub normalize_timestamps: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckReport {
    pub channel: ChannelId,
    /// The repeated line, as compared (normalized when enabled)
    pub line: String,
    pub repeats: usize,
}

/// Strip volatile substrings so lines that differ only by a clock compare equal
pub fn normalize(line: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(line);
    for (regex, placeholder) in [
        (&*ISO_TIMESTAMP, "<TIMESTAMP>"),
        (&*BRACKETED_CLOCK, "[<TIME>]"),
        (&*ISO_DATE, "<DATE>"),
        (&*EPOCH, "<EPOCH>"),
    ] {
        if regex.is_match(&out) {
            out = Cow::Owned(regex.replace_all(&out, placeholder).into_owned());
        }
    }
    out
}

#[derive(Debug)]
pub struct StuckWindow {
    recent: VecDeque<String>,
    capacity: usize,
    repeats: usize,
}

impl StuckWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity),
            capacity,
            repeats: 0,
        }
    }

    /// Push a compared line and return the current run length of identical lines
    pub fn push(&mut self, line: String) -> usize {
        if self.recent.back() == Some(&line) {
            self.repeats += 1;
        } else {
            self.repeats = 1;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(line);
        self.repeats
    }

    pub fn repeats(&self) -> usize {
        self.repeats
    }

    pub fn recent(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }
}

pub struct StuckDetector {
    config: StuckConfig,
    windows: HashMap<ChannelId, StuckWindow>,
}

impl StuckDetector {
    pub fn new(config: StuckConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn observe(&mut self, channel: ChannelId, line: &str) -> Option<StuckReport> {
        let compared = if self.config.normalize_timestamps {
            normalize(line).into_owned()
        } else {
            line.to_string()
        };

        let capacity = self.config.threshold.max(DEFAULT_WINDOW);
        let window = self
            .windows
            .entry(channel)
            .or_insert_with(|| StuckWindow::new(capacity));

        let repeats = window.push(compared.clone());
        (repeats >= self.config.threshold).then(|| StuckReport {
            channel,
            line: compared,
            repeats,
        })
    }

    pub fn window(&self, channel: ChannelId) -> Option<&StuckWindow> {
        self.windows.get(&channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(threshold: usize, normalize_timestamps: bool) -> StuckDetector {
        StuckDetector::new(StuckConfig {
            threshold,
            normalize_timestamps,
        })
    }

    #[test]
    fn test_threshold_identical_lines_is_stuck() {
        let mut d = detector(3, false);
        assert!(d.observe(ChannelId::Stdout, "waiting for lock").is_none());
        assert!(d.observe(ChannelId::Stdout, "waiting for lock").is_none());
        let report = d.observe(ChannelId::Stdout, "waiting for lock").unwrap();
        assert_eq!(report.repeats, 3);
        assert_eq!(report.channel, ChannelId::Stdout);
    }

    #[test]
    fn test_one_short_then_different_is_not_stuck() {
        let mut d = detector(3, false);
        assert!(d.observe(ChannelId::Stdout, "retry").is_none());
        assert!(d.observe(ChannelId::Stdout, "retry").is_none());
        assert!(d.observe(ChannelId::Stdout, "connected").is_none());
        assert!(d.observe(ChannelId::Stdout, "retry").is_none());
        assert_eq!(d.window(ChannelId::Stdout).unwrap().repeats(), 1);
    }

    #[test]
    fn test_channels_are_tracked_separately() {
        let mut d = detector(2, false);
        assert!(d.observe(ChannelId::Stdout, "same").is_none());
        assert!(d.observe(ChannelId::Stderr, "same").is_none());
        assert!(d.observe(ChannelId::Stdout, "same").is_some());
    }

    #[test]
    fn test_bracketed_clock_ignored_only_when_normalizing() {
        let lines = ["[12:00:01] polling", "[12:00:02] polling", "[12:00:03] polling"];

        let mut literal = detector(3, false);
        assert!(lines
            .iter()
            .all(|l| literal.observe(ChannelId::Stdout, l).is_none()));

        let mut normalized = detector(3, true);
        let reports: Vec<_> = lines
            .iter()
            .filter_map(|l| normalized.observe(ChannelId::Stdout, l))
            .collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].line, "[<TIME>] polling");
    }

    #[test]
    fn test_normalize_volatile_substrings() {
        assert_eq!(
            normalize("2024-01-15T10:30:45.123Z tick"),
            "<TIMESTAMP> tick"
        );
        assert_eq!(normalize("backup 2024-01-15 done"), "backup <DATE> done");
        assert_eq!(normalize("ts=1700000000 ok"), "ts=<EPOCH> ok");
        assert_eq!(normalize("ts=1700000000123 ok"), "ts=<EPOCH> ok");
        assert_eq!(normalize("[09:15:00.5] up"), "[<TIME>] up");
        assert_eq!(normalize("build 12345 ok"), "build 12345 ok");
    }

    #[test]
    fn test_window_is_bounded() {
        let mut window = StuckWindow::new(3);
        for i in 0..10 {
            window.push(format!("line {i}"));
        }
        let recent: Vec<_> = window.recent().collect();
        assert_eq!(recent, vec!["line 7", "line 8", "line 9"]);
    }
}
