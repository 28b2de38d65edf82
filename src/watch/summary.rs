//! Outcome of one supervised run

use super::matcher::{MatchEvent, MatchKind};
use super::stuck::StuckReport;
use super::termination::{ChildExit, FinalAction, TerminationCause};
use crate::subprocess::streaming::ChannelId;
use humantime_serde::re::humantime::format_duration;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub channel: ChannelId,
    pub line: String,
    pub matched: String,
    pub line_number: u64,
    pub kind: MatchKind,
}

impl From<&MatchEvent> for MatchRecord {
    fn from(event: &MatchEvent) -> Self {
        Self {
            channel: event.channel,
            line: event.line.clone(),
            matched: event.matched.clone(),
            line_number: event.line_number,
            kind: event.kind,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub cause: TerminationCause,
    pub action: FinalAction,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchRecord>,
    pub match_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stuck: Option<StuckReport>,
    pub lines: u64,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_exit: Option<ChildExit>,
    /// The limit that expired, for timeout causes
    #[serde(skip)]
    pub timeout_limit: Option<Duration>,
}

impl RunSummary {
    pub fn is_abnormal(&self) -> bool {
        self.exit_code != 0
    }

    /// One-line description starting with the cause identifier
    pub fn describe(&self) -> String {
        let mut message = self.cause.to_string();

        match self.cause {
            TerminationCause::Match(kind) => {
                if let Some(m) = &self.matched {
                    message.push_str(&format!(
                        " ({kind}) on {} line {}: {}",
                        m.channel, m.line_number, m.line
                    ));
                }
            }
            TerminationCause::Stuck => {
                if let Some(report) = &self.stuck {
                    message.push_str(&format!(
                        " on {}: {} identical lines: {}",
                        report.channel, report.repeats, report.line
                    ));
                }
            }
            TerminationCause::Timeout(_) => {
                if let Some(limit) = self.timeout_limit {
                    message.push_str(&format!(" after {}", format_duration(limit)));
                }
            }
            TerminationCause::Interrupt => {}
            TerminationCause::NaturalExit => {
                if self.matched.is_none() {
                    message.push_str(": no match");
                }
                if let Some(code) = self.child_exit.and_then(|e| e.code) {
                    message.push_str(&format!(" (child exited with {code})"));
                }
            }
        }

        if let FinalAction::Detached { pid, pgid } = self.action {
            message.push_str(&format!(", detached pid {pid} (pgid {pgid})"));
        }

        message
    }
}
