//! The coordinator
//!
//! One task owns the multiplexer, the matcher, the stuck detector, the
//! timeout coordinator and the termination protocol. Everything else (channel
//! readers, timers, the reaper, the signal thread) only pushes events into
//! the multiplexer's queue. Events are handled in batches: whatever is queued
//! when the coordinator wakes up is one scheduling quantum, and the
//! highest-priority cause in it wins.

use super::exit_code::resolve_exit_code;
use super::matcher::{Evaluation, PatternMatcher};
use super::prompt::{ConfirmTerminate, InterruptPrompt, PromptContext, PromptOutcome};
use super::recorder::{NullRecorder, RunRecorder};
use super::signal_handler::forward_interrupts;
use super::stuck::{StuckDetector, StuckReport};
use super::summary::{MatchRecord, RunSummary};
use super::termination::{
    ChildExit, ChildHandle, ContextWindow, MonitoredProcess, TerminationCause,
    TerminationProtocol,
};
use super::timeout::{TimeoutCoordinator, TimerFired};
use crate::config::WatchConfig;
use crate::error::LookoutError;
use crate::subprocess::streaming::{ChannelId, LineEvent, MuxEvent, MuxPoll, Multiplexer};
use crate::subprocess::{launch, ChannelReader, LaunchedChild, ProcessCommand};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Lines kept around to show the prompt
const RECENT_LINES: usize = 10;

/// Non-channel events that share the queue with output
#[derive(Debug, Clone, Copy)]
pub enum ControlEvent {
    Timer(TimerFired),
    Interrupt,
    ChildExited(ChildExit),
}

type Poll = MuxPoll<ControlEvent>;

/// What is being supervised
pub enum Source {
    Command(ProcessCommand),
    /// A stream that is not ours to signal, e.g. our own stdin
    Stream(ChannelReader),
}

impl Source {
    pub fn stdin() -> Self {
        Source::Stream(Box::new(tokio::io::stdin()))
    }
}

/// Whether delivered lines are echoed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    Off,
    On,
}

pub struct Supervisor {
    config: WatchConfig,
    source: Source,
    recorder: Arc<dyn RunRecorder>,
    prompt: Arc<dyn InterruptPrompt>,
    forward_signals: bool,
}

/// Mutable state of one run
struct Run {
    started: Instant,
    matcher: PatternMatcher,
    stuck: Option<StuckDetector>,
    stuck_report: Option<StuckReport>,
    timeouts: TimeoutCoordinator,
    protocol: TerminationProtocol,
    recent: VecDeque<String>,
    /// Events read but not yet handled, oldest first
    pending: VecDeque<Poll>,
    child_exited_at: Option<Instant>,
    echo: Echo,
}

impl Supervisor {
    pub fn new(config: WatchConfig, source: Source) -> Self {
        Self {
            config,
            source,
            recorder: Arc::new(NullRecorder),
            prompt: Arc::new(ConfirmTerminate),
            forward_signals: false,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn InterruptPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Route SIGINT/SIGTERM into the run as interrupts
    pub fn with_signal_forwarding(mut self, enabled: bool) -> Self {
        self.forward_signals = enabled;
        self
    }

    pub async fn run(self) -> Result<RunSummary, LookoutError> {
        let Supervisor {
            config,
            source,
            recorder,
            prompt,
            forward_signals,
        } = self;

        let matcher = PatternMatcher::new(&config.patterns)?;
        let started = Instant::now();
        let mut mux: Multiplexer<ControlEvent> = Multiplexer::new();

        let process = match source {
            Source::Command(command) => {
                let LaunchedChild {
                    mut child,
                    pid,
                    pgid,
                    channels,
                } = launch(&command)?;
                info!("Supervising `{}` (pid {})", command.display(), pid);
                for (id, reader) in channels {
                    mux.attach(id, reader);
                }

                let (exit_tx, exit_rx) = watch::channel(None);
                let events = mux.sender();
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) => {
                            let exit = ChildExit::from(status);
                            debug!("Child {} exited: {:?}", pid, exit);
                            let _ = exit_tx.send(Some(exit));
                            let _ = events
                                .send(MuxEvent::Control(ControlEvent::ChildExited(exit)))
                                .await;
                        }
                        Err(e) => warn!("Failed to wait for child {}: {}", pid, e),
                    }
                });

                MonitoredProcess::attached(ChildHandle {
                    pid,
                    pgid,
                    exit: exit_rx,
                })
            }
            Source::Stream(reader) => {
                mux.attach(ChannelId::Stdin, reader);
                MonitoredProcess::stream_only()
            }
        };

        let _forwarder = if forward_signals {
            Some(forward_interrupts(mux.sender())?)
        } else {
            None
        };

        let timeouts =
            TimeoutCoordinator::start(&config.timeouts, started, mux.sender(), timer_event);

        let mut run = Run {
            started,
            matcher,
            stuck: config.stuck.map(StuckDetector::new),
            stuck_report: None,
            timeouts,
            protocol: TerminationProtocol::new(process, config.termination),
            recent: VecDeque::with_capacity(RECENT_LINES),
            pending: VecDeque::new(),
            child_exited_at: None,
            echo: if config.quiet { Echo::Off } else { Echo::On },
        };

        let cause = run
            .supervise(&mut mux, &config, recorder.as_ref(), prompt.as_ref())
            .await;

        run.timeouts.cancel();
        if let Some(context) = run.protocol.decision().and_then(|d| d.context) {
            run.capture_context(&mut mux, context, config.drain_timeout, recorder.as_ref())
                .await;
        }

        let action = run.protocol.finish().await;
        mux.shutdown();

        let summary = RunSummary {
            cause,
            action,
            exit_code: resolve_exit_code(cause, action, config.exit_convention),
            matched: run.matcher.latched().map(MatchRecord::from),
            match_count: run.matcher.match_count(),
            stuck: run.stuck_report.take(),
            lines: mux.lines_delivered(),
            elapsed: started.elapsed(),
            pid: run.protocol.process().pid(),
            child_exit: run.protocol.process().exit_status(),
            timeout_limit: match cause {
                TerminationCause::Timeout(kind) => config.timeouts.get(kind),
                _ => None,
            },
        };

        if let Err(e) = recorder.record_outcome(&summary).await {
            warn!("Failed to record outcome: {:#}", e);
        }

        info!(
            "Run finished: {} (exit code {}, {} line(s), {:?})",
            summary.cause, summary.exit_code, summary.lines, summary.elapsed
        );
        Ok(summary)
    }
}

impl Run {
    /// Handle events until a cause is latched
    async fn supervise(
        &mut self,
        mux: &mut Multiplexer<ControlEvent>,
        config: &WatchConfig,
        recorder: &dyn RunRecorder,
        prompt: &dyn InterruptPrompt,
    ) -> TerminationCause {
        loop {
            let mut batch: Vec<Poll> = self.pending.drain(..).collect();
            if batch.is_empty() {
                // After the child is gone, give descendants holding the
                // channels a bounded time to finish writing.
                let wait = self.child_exited_at.map(|at| {
                    (at + config.drain_timeout).saturating_duration_since(Instant::now())
                });
                batch.push(mux.next_line(wait).await);
            }
            while let Some(poll) = mux.try_next() {
                batch.push(poll);
            }

            let mut candidates = self.process_batch(batch, config, recorder).await;
            candidates.sort_by_key(|(cause, index)| {
                (std::cmp::Reverse(cause.priority()), *index)
            });

            for (cause, _) in candidates {
                if cause == TerminationCause::Interrupt && config.learn {
                    match self.ask(mux, prompt).await {
                        PromptOutcome::Resume(patterns) => {
                            info!("Resuming with a learned pattern");
                            self.matcher.replace(patterns);
                            continue;
                        }
                        PromptOutcome::Terminate => {}
                    }
                }
                if self.protocol.latch(cause) {
                    return cause;
                }
            }
        }
    }

    /// Handle one batch in arrival order and collect candidate causes.
    ///
    /// Lines after the first line-derived cause are left in `pending` so they
    /// can feed context capture or, if the run resumes, normal handling.
    async fn process_batch(
        &mut self,
        batch: Vec<Poll>,
        config: &WatchConfig,
        recorder: &dyn RunRecorder,
    ) -> Vec<(TerminationCause, usize)> {
        let mut candidates = Vec::new();
        let mut line_cause_seen = false;

        for (index, poll) in batch.into_iter().enumerate() {
            match poll {
                MuxPoll::Line(line) if line_cause_seen => {
                    self.pending.push_back(MuxPoll::Line(line));
                }
                MuxPoll::Line(line) => {
                    if let Some(cause) = self.observe(&line, config, recorder).await {
                        line_cause_seen = true;
                        candidates.push((cause, index));
                    }
                }
                MuxPoll::Control(ControlEvent::Timer(fired)) => {
                    if self.timeouts.is_current(&fired) {
                        candidates.push((TerminationCause::Timeout(fired.kind), index));
                    } else {
                        trace!("Discarding stale {} timer firing", fired.kind);
                    }
                }
                MuxPoll::Control(ControlEvent::Interrupt) => {
                    candidates.push((TerminationCause::Interrupt, index));
                }
                MuxPoll::Control(ControlEvent::ChildExited(exit)) => {
                    debug!("Child exit observed: {:?}", exit);
                    self.child_exited_at.get_or_insert_with(Instant::now);
                }
                MuxPoll::Idle => {
                    debug!("Channels still open after drain period, treating as exit");
                    candidates.push((self.end_of_output(), index));
                }
                MuxPoll::AllChannelsClosed => {
                    candidates.push((self.end_of_output(), index));
                }
            }
        }

        candidates
    }

    fn end_of_output(&self) -> TerminationCause {
        match self.matcher.latched() {
            Some(latched) => TerminationCause::Match(latched.kind),
            None => TerminationCause::NaturalExit,
        }
    }

    async fn observe(
        &mut self,
        line: &LineEvent,
        config: &WatchConfig,
        recorder: &dyn RunRecorder,
    ) -> Option<TerminationCause> {
        self.emit(line, recorder).await;
        self.timeouts.on_line(line.channel, line.at);

        if self.recent.len() == RECENT_LINES {
            self.recent.pop_front();
        }
        self.recent.push_back(line.text.clone());

        if let Evaluation::Match { kind, .. } = self.matcher.observe(line) {
            trace!("Line {} matched ({})", line.number, kind);
            if self.matcher.match_count() >= config.max_count {
                if let Some(latched) = self.matcher.latched() {
                    return Some(TerminationCause::Match(latched.kind));
                }
            }
        }

        if let Some(report) = self
            .stuck
            .as_mut()
            .and_then(|s| s.observe(line.channel, &line.text))
        {
            debug!("{} repeated {} times on {}", report.line, report.repeats, report.channel);
            self.stuck_report = Some(report);
            return Some(TerminationCause::Stuck);
        }

        None
    }

    async fn emit(&self, line: &LineEvent, recorder: &dyn RunRecorder) {
        if self.echo == Echo::On {
            echo(line);
        }
        if let Err(e) = recorder.record_line(line).await {
            warn!("Failed to record line {}: {:#}", line.number, e);
        }
    }

    /// Run the prompt while keeping the queue moving. A second interrupt
    /// while the prompt is up terminates.
    async fn ask(
        &mut self,
        mux: &mut Multiplexer<ControlEvent>,
        prompt: &dyn InterruptPrompt,
    ) -> PromptOutcome {
        let context = PromptContext {
            lines_seen: mux.lines_delivered(),
            elapsed: self.started.elapsed(),
            recent: self.recent.iter().cloned().collect(),
            options: self.matcher.options(),
        };

        let answer = prompt.on_interrupt(&context);
        tokio::pin!(answer);
        let mut closed = false;

        loop {
            tokio::select! {
                outcome = &mut answer => return outcome,
                poll = mux.next_line(None), if !closed => match poll {
                    MuxPoll::Control(ControlEvent::Interrupt) => {
                        debug!("Second interrupt while prompting");
                        return PromptOutcome::Terminate;
                    }
                    MuxPoll::AllChannelsClosed => {
                        closed = true;
                        self.pending.push_back(poll);
                    }
                    other => self.pending.push_back(other),
                },
            }
        }
    }

    /// Let trailing output through after a match, up to the configured bound.
    ///
    /// Without a duration bound, the capture gives up after `silence` with no
    /// new line.
    async fn capture_context(
        &mut self,
        mux: &mut Multiplexer<ControlEvent>,
        context: ContextWindow,
        silence: Duration,
        recorder: &dyn RunRecorder,
    ) {
        let deadline = context.duration.map(|d| Instant::now() + d);
        let mut remaining = context.lines;
        debug!("Capturing context: {:?}", context);

        loop {
            if remaining == Some(0) {
                break;
            }
            let poll = match self.pending.pop_front() {
                Some(poll) => poll,
                None => {
                    let wait = match deadline {
                        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                        None => silence,
                    };
                    if wait.is_zero() {
                        break;
                    }
                    mux.next_line(Some(wait)).await
                }
            };

            match poll {
                MuxPoll::Line(line) => {
                    self.emit(&line, recorder).await;
                    remaining = remaining.map(|n| n.saturating_sub(1));
                }
                MuxPoll::Control(ControlEvent::Interrupt) => {
                    debug!("Interrupt during context capture");
                    break;
                }
                MuxPoll::Control(_) => {}
                MuxPoll::Idle | MuxPoll::AllChannelsClosed => break,
            }
        }
    }
}

fn timer_event(fired: TimerFired) -> MuxEvent<ControlEvent> {
    MuxEvent::Control(ControlEvent::Timer(fired))
}

fn echo(line: &LineEvent) {
    let result = match line.channel {
        ChannelId::Stdout | ChannelId::Stdin => writeln!(std::io::stdout().lock(), "{}", line.text),
        ChannelId::Stderr => writeln!(std::io::stderr().lock(), "{}", line.text),
        ChannelId::Fd(n) => writeln!(std::io::stderr().lock(), "[fd{n}] {}", line.text),
    };
    if let Err(e) = result {
        trace!("Echo failed: {}", e);
    }
}
