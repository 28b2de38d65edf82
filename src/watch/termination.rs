//! Termination protocol
//!
//! Exactly one [`TerminationDecision`] is latched per run; everything after
//! that is about driving the child to its final state. Only this module
//! signals the child.

use super::matcher::MatchKind;
use super::timeout::TimeoutKind;
use crate::subprocess::ProcessError;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for the kernel to reap a child after SIGKILL
const KILL_REAP_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Running,
    MatchPending,
    Terminating,
    Killed,
    Detached,
    Exited,
}

impl ProcessState {
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Running, MatchPending)
                | (MatchPending, Terminating)
                | (MatchPending, Detached)
                | (MatchPending, Exited)
                | (Terminating, Killed)
                | (Terminating, Exited)
                | (Killed, Exited)
                | (Detached, Exited)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Match(MatchKind),
    Stuck,
    Timeout(TimeoutKind),
    Interrupt,
    NaturalExit,
}

impl TerminationCause {
    /// Higher wins when several causes land in one batch
    pub fn priority(&self) -> u8 {
        match self {
            TerminationCause::Interrupt => 4,
            TerminationCause::Match(_) => 3,
            TerminationCause::Stuck => 2,
            TerminationCause::Timeout(_) => 1,
            TerminationCause::NaturalExit => 0,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        !matches!(self, TerminationCause::Match(_) | TerminationCause::NaturalExit)
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::Match(_) => write!(f, "match"),
            TerminationCause::Stuck => write!(f, "stuck"),
            TerminationCause::Timeout(kind) => write!(f, "timeout:{kind}"),
            TerminationCause::Interrupt => write!(f, "interrupt"),
            TerminationCause::NaturalExit => write!(f, "naturalExit"),
        }
    }
}

impl Serialize for TerminationCause {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationAction {
    /// SIGTERM, grace period, then SIGKILL
    Stop,
    /// SIGKILL straight away
    Kill,
    Detach,
    None,
}

/// Trailing output to let through after a match, whichever bound hits first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextWindow {
    pub lines: Option<usize>,
    pub duration: Option<Duration>,
}

impl ContextWindow {
    pub fn is_empty(&self) -> bool {
        self.lines.unwrap_or(0) == 0 && self.duration.map_or(true, |d| d.is_zero())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationDecision {
    pub cause: TerminationCause,
    pub context: Option<ContextWindow>,
    pub action: TerminationAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub detach_on_match: bool,
    pub detach_on_timeout: bool,
    /// Signal the whole process group instead of just the child
    pub group: bool,
    pub grace: Duration,
    pub context: ContextWindow,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            detach_on_match: false,
            detach_on_timeout: false,
            group: false,
            grace: DEFAULT_GRACE,
            context: ContextWindow::default(),
        }
    }
}

impl TerminationPolicy {
    pub fn decide(&self, cause: TerminationCause, has_child: bool) -> TerminationDecision {
        let detach = match cause {
            TerminationCause::Match(_) => self.detach_on_match,
            TerminationCause::Timeout(_) => self.detach_on_timeout,
            _ => false,
        };

        let action = if !has_child || cause == TerminationCause::NaturalExit {
            TerminationAction::None
        } else if detach {
            TerminationAction::Detach
        } else if self.grace.is_zero() {
            TerminationAction::Kill
        } else {
            TerminationAction::Stop
        };

        let context = match cause {
            TerminationCause::Match(_) if !self.context.is_empty() => Some(self.context),
            _ => None,
        };

        TerminationDecision {
            cause,
            context,
            action,
        }
    }
}

/// How the child left, as reported by the reaper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChildHandle {
    pub pid: u32,
    pub pgid: u32,
    pub exit: watch::Receiver<Option<ChildExit>>,
}

/// The supervised child as the protocol sees it
#[derive(Debug)]
pub struct MonitoredProcess {
    child: Option<ChildHandle>,
    state: ProcessState,
}

impl MonitoredProcess {
    pub fn attached(handle: ChildHandle) -> Self {
        Self {
            child: Some(handle),
            state: ProcessState::Running,
        }
    }

    /// Supervising a piped stream; there is nothing to signal
    pub fn stream_only() -> Self {
        Self {
            child: None,
            state: ProcessState::Running,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.pid)
    }

    pub fn pgid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.pgid)
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ChildExit> {
        self.child.as_ref().and_then(|c| *c.exit.borrow())
    }

    fn transition(&mut self, next: ProcessState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Process state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn wait_exit(&mut self, within: Duration) -> Option<ChildExit> {
        let child = self.child.as_mut()?;
        let mut exit = child.exit.clone();
        let waited = tokio::time::timeout(within, exit.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(status)) => *status,
            _ => *child.exit.borrow(),
        }
    }

    fn signal(&self, sig: Signal, group: bool) -> Result<(), ProcessError> {
        let Some(child) = &self.child else {
            return Ok(());
        };
        // A negative pid addresses the whole group.
        let target = if group {
            -(child.pgid as i32)
        } else {
            child.pid as i32
        };
        match signal::kill(Pid::from_raw(target), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::SignalDelivery {
                signal: sig.as_str(),
                target,
                source,
            }),
        }
    }
}

/// What actually happened to the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FinalAction {
    /// Nothing was sent; the child had exited or there was no child
    None,
    Stopped,
    Killed,
    Detached { pid: u32, pgid: u32 },
}

pub struct TerminationProtocol {
    process: MonitoredProcess,
    policy: TerminationPolicy,
    decision: Option<TerminationDecision>,
}

impl TerminationProtocol {
    pub fn new(process: MonitoredProcess, policy: TerminationPolicy) -> Self {
        Self {
            process,
            policy,
            decision: None,
        }
    }

    /// Latch `cause` unless a decision already exists. Returns whether it won.
    pub fn latch(&mut self, cause: TerminationCause) -> bool {
        if let Some(existing) = &self.decision {
            debug!(
                "Discarding {} (already latched {})",
                cause, existing.cause
            );
            return false;
        }

        let decision = self.policy.decide(cause, self.process.child.is_some());
        info!(
            "Latched termination cause {} (action {:?})",
            decision.cause, decision.action
        );
        self.process.transition(ProcessState::MatchPending);
        self.decision = Some(decision);
        true
    }

    pub fn decision(&self) -> Option<&TerminationDecision> {
        self.decision.as_ref()
    }

    pub fn process(&self) -> &MonitoredProcess {
        &self.process
    }

    pub fn state(&self) -> ProcessState {
        self.process.state
    }

    /// Carry out the latched decision and leave the process `Exited`
    pub async fn finish(&mut self) -> FinalAction {
        let Some(decision) = self.decision else {
            return FinalAction::None;
        };
        if self.process.state == ProcessState::Exited {
            return FinalAction::None;
        }

        match decision.action {
            TerminationAction::None => {
                self.process.wait_exit(KILL_REAP_WAIT).await;
                self.process.transition(ProcessState::Exited);
                FinalAction::None
            }
            TerminationAction::Detach => {
                self.process.transition(ProcessState::Detached);
                let pid = self.process.pid().unwrap_or_default();
                let pgid = self.process.pgid().unwrap_or_default();
                info!("Detached from pid {} (pgid {})", pid, pgid);
                self.process.transition(ProcessState::Exited);
                FinalAction::Detached { pid, pgid }
            }
            TerminationAction::Stop | TerminationAction::Kill => {
                self.process.transition(ProcessState::Terminating);
                let outcome = self.terminate(decision.action).await;
                self.process.transition(ProcessState::Exited);
                outcome
            }
        }
    }

    async fn terminate(&mut self, action: TerminationAction) -> FinalAction {
        if self.process.exit_status().is_some() {
            debug!("Child already exited, nothing to signal");
            return FinalAction::None;
        }

        let group = self.policy.group;
        if action == TerminationAction::Stop {
            if let Err(e) = self.process.signal(Signal::SIGTERM, group) {
                warn!("{}", e);
            }
            if self.process.wait_exit(self.policy.grace).await.is_some() {
                return FinalAction::Stopped;
            }
            debug!(
                "Child survived {:?} grace period, escalating to SIGKILL",
                self.policy.grace
            );
        }

        if let Err(e) = self.process.signal(Signal::SIGKILL, group) {
            warn!("{}", e);
        }
        self.process.transition(ProcessState::Killed);
        self.process.wait_exit(KILL_REAP_WAIT).await;
        FinalAction::Killed
    }
}
