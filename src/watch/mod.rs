//! Stream supervision and the termination decision
//!
//! Lines from the multiplexer feed the [`PatternMatcher`] and the
//! [`StuckDetector`] while the [`TimeoutCoordinator`] counts down on its own.
//! The first terminal condition is latched by the [`TerminationProtocol`],
//! which stops, kills or detaches from the child, and the exit code is
//! resolved from the outcome.

pub mod exit_code;
pub mod matcher;
pub mod prompt;
pub mod recorder;
pub mod signal_handler;
pub mod stuck;
pub mod summary;
pub mod supervisor;
pub mod termination;
pub mod timeout;

pub use exit_code::{codes, resolve_exit_code, ExitConvention};
pub use matcher::{
    Evaluation, MatchEvent, MatchKind, MatchOptions, PatternConfig, PatternError, PatternMatcher,
    PatternSet, PatternSpec,
};
pub use prompt::{ConfirmTerminate, InterruptPrompt, PromptContext, PromptOutcome, TerminalPrompt};
pub use recorder::{JsonlRecorder, NullRecorder, RunRecorder};
pub use stuck::{StuckConfig, StuckDetector, StuckReport};
pub use summary::{MatchRecord, RunSummary};
pub use supervisor::{ControlEvent, Source, Supervisor};
pub use termination::{
    ChildExit, ContextWindow, FinalAction, ProcessState, TerminationAction, TerminationCause,
    TerminationDecision, TerminationPolicy, TerminationProtocol, DEFAULT_GRACE,
};
pub use timeout::{TimeoutCoordinator, TimeoutKind, TimeoutSet};
