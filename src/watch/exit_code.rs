use super::matcher::MatchKind;
use super::termination::{FinalAction, TerminationCause};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which meaning the process exit code carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitConvention {
    /// grep-like: 0 when the pattern was seen, 1 when it was not
    #[default]
    Match,
    /// 0 for success, 1 for a matched error pattern
    SuccessFailure,
}

pub mod codes {
    pub const MATCHED: i32 = 0;
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const NO_MATCH: i32 = 1;
    pub const TIMEOUT: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
    pub const DETACHED: i32 = 4;
    pub const INTERRUPTED: i32 = 130;
}

pub fn resolve_exit_code(
    cause: TerminationCause,
    action: FinalAction,
    convention: ExitConvention,
) -> i32 {
    if matches!(action, FinalAction::Detached { .. }) {
        return codes::DETACHED;
    }

    match (cause, convention) {
        (TerminationCause::Interrupt, _) => codes::INTERRUPTED,
        (TerminationCause::Timeout(_) | TerminationCause::Stuck, _) => codes::TIMEOUT,
        (TerminationCause::Match(_), ExitConvention::Match) => codes::MATCHED,
        (TerminationCause::Match(MatchKind::Error), ExitConvention::SuccessFailure) => {
            codes::FAILURE
        }
        (TerminationCause::Match(_), ExitConvention::SuccessFailure) => codes::SUCCESS,
        (TerminationCause::NaturalExit, ExitConvention::Match) => codes::NO_MATCH,
        (TerminationCause::NaturalExit, ExitConvention::SuccessFailure) => codes::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::timeout::TimeoutKind;

    fn code(cause: TerminationCause, convention: ExitConvention) -> i32 {
        resolve_exit_code(cause, FinalAction::Stopped, convention)
    }

    #[test]
    fn test_match_convention() {
        let c = ExitConvention::Match;
        assert_eq!(code(TerminationCause::Match(MatchKind::Single), c), 0);
        assert_eq!(code(TerminationCause::Match(MatchKind::Error), c), 0);
        assert_eq!(code(TerminationCause::NaturalExit, c), 1);
        assert_eq!(code(TerminationCause::Timeout(TimeoutKind::Idle), c), 2);
        assert_eq!(code(TerminationCause::Stuck, c), 2);
        assert_eq!(code(TerminationCause::Interrupt, c), 130);
    }

    #[test]
    fn test_success_failure_convention() {
        let c = ExitConvention::SuccessFailure;
        assert_eq!(code(TerminationCause::Match(MatchKind::Success), c), 0);
        assert_eq!(code(TerminationCause::Match(MatchKind::Error), c), 1);
        assert_eq!(code(TerminationCause::NaturalExit, c), 0);
        assert_eq!(code(TerminationCause::Timeout(TimeoutKind::Overall), c), 2);
    }

    #[test]
    fn test_detach_overrides_cause() {
        let detached = FinalAction::Detached { pid: 42, pgid: 42 };
        for convention in [ExitConvention::Match, ExitConvention::SuccessFailure] {
            assert_eq!(
                resolve_exit_code(
                    TerminationCause::Timeout(TimeoutKind::Overall),
                    detached,
                    convention
                ),
                codes::DETACHED
            );
        }
    }
}
