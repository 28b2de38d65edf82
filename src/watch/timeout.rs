//! Timeout coordination
//!
//! Up to four countdowns run concurrently against the tokio clock, each in
//! its own task. The coordinator moves deadlines through a watch channel; a
//! firing timer reports the generation it was armed with so a firing that
//! raced with a reset can be recognised and dropped.

use crate::subprocess::streaming::ChannelId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutKind {
    /// Absolute deadline from start, never reset
    Overall,
    /// Silence across every channel
    Idle,
    /// Silence from the very start; disarmed by the first line
    FirstOutput,
    /// Silence on stderr after it has spoken
    StderrIdle,
}

impl TimeoutKind {
    pub const ALL: [TimeoutKind; 4] = [
        TimeoutKind::Overall,
        TimeoutKind::Idle,
        TimeoutKind::FirstOutput,
        TimeoutKind::StderrIdle,
    ];
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Overall => write!(f, "overall"),
            TimeoutKind::Idle => write!(f, "idle"),
            TimeoutKind::FirstOutput => write!(f, "firstOutput"),
            TimeoutKind::StderrIdle => write!(f, "stderrIdle"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutSet {
    pub overall: Option<Duration>,
    pub idle: Option<Duration>,
    pub first_output: Option<Duration>,
    pub stderr_idle: Option<Duration>,
}

impl TimeoutSet {
    pub fn get(&self, kind: TimeoutKind) -> Option<Duration> {
        match kind {
            TimeoutKind::Overall => self.overall,
            TimeoutKind::Idle => self.idle,
            TimeoutKind::FirstOutput => self.first_output,
            TimeoutKind::StderrIdle => self.stderr_idle,
        }
    }

    pub fn is_empty(&self) -> bool {
        TimeoutKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimeoutKind,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Option<Instant>,
    generation: u64,
}

struct ArmedTimer {
    kind: TimeoutKind,
    duration: Duration,
    current: Deadline,
    tx: watch::Sender<Deadline>,
    task: JoinHandle<()>,
}

impl ArmedTimer {
    fn set(&mut self, at: Option<Instant>) {
        self.current = Deadline {
            at,
            generation: self.current.generation + 1,
        };
        let _ = self.tx.send(self.current);
    }
}

pub struct TimeoutCoordinator {
    timers: Vec<ArmedTimer>,
}

impl TimeoutCoordinator {
    /// Arm every configured timer; firings are sent through `events` wrapped by `wrap`.
    ///
    /// The stderr-idle countdown starts with the first stderr line; the
    /// others start at `started`.
    pub fn start<T: Send + 'static>(
        set: &TimeoutSet,
        started: Instant,
        events: mpsc::Sender<T>,
        wrap: fn(TimerFired) -> T,
    ) -> Self {
        let timers = TimeoutKind::ALL
            .iter()
            .filter_map(|&kind| {
                let duration = set.get(kind)?;
                let at = match kind {
                    TimeoutKind::StderrIdle => None,
                    _ => Some(started + duration),
                };
                let current = Deadline { at, generation: 0 };
                let (tx, rx) = watch::channel(current);
                let task = tokio::spawn(run_timer(kind, rx, events.clone(), wrap));
                debug!("Armed {} timeout ({:?})", kind, duration);
                Some(ArmedTimer {
                    kind,
                    duration,
                    current,
                    tx,
                    task,
                })
            })
            .collect();

        Self { timers }
    }

    /// Account for a line that arrived on `channel` at `at`
    pub fn on_line(&mut self, channel: ChannelId, at: Instant) {
        for timer in &mut self.timers {
            match timer.kind {
                TimeoutKind::Idle => timer.set(Some(at + timer.duration)),
                TimeoutKind::FirstOutput if timer.current.at.is_some() => {
                    trace!("First output seen, disarming first-output timeout");
                    timer.set(None);
                }
                TimeoutKind::StderrIdle if channel.is_stderr() => {
                    timer.set(Some(at + timer.duration))
                }
                _ => {}
            }
        }
    }

    /// Whether a firing still reflects the timer's current deadline
    pub fn is_current(&self, fired: &TimerFired) -> bool {
        self.timers.iter().any(|t| {
            t.kind == fired.kind
                && t.current.at.is_some()
                && t.current.generation == fired.generation
        })
    }

    pub fn deadline(&self, kind: TimeoutKind) -> Option<Instant> {
        self.timers
            .iter()
            .find(|t| t.kind == kind)
            .and_then(|t| t.current.at)
    }

    pub fn armed(&self) -> usize {
        self.timers.iter().filter(|t| t.current.at.is_some()).count()
    }

    /// Disarm everything. Later firings are never current.
    pub fn cancel(&mut self) {
        for timer in self.timers.drain(..) {
            timer.task.abort();
        }
    }
}

impl Drop for TimeoutCoordinator {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_timer<T>(
    kind: TimeoutKind,
    mut rx: watch::Receiver<Deadline>,
    events: mpsc::Sender<T>,
    wrap: fn(TimerFired) -> T,
) {
    loop {
        let deadline = *rx.borrow_and_update();
        match deadline.at {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        let fired = TimerFired { kind, generation: deadline.generation };
                        if events.send(wrap(fired)).await.is_err() {
                            return;
                        }
                        // Fire once per generation.
                        if rx.changed().await.is_err() {
                            return;
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}
