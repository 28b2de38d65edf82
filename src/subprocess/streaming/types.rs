//! Core types for streaming infrastructure

use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

/// Line buffer size for channel readers in bytes
pub const LINE_BUFFER_SIZE: usize = 8192;

/// Capacity of the shared event queue
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// How the child's standard streams are connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// One pseudo-terminal per stream; the child sees a tty and line-buffers
    #[default]
    Pty,
    /// Plain anonymous pipes
    Pipe,
}

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    Stdout,
    Stderr,
    /// An extra descriptor exposed to the child under this number
    Fd(i32),
    /// Our own standard input, when supervising a pipeline instead of a command
    Stdin,
}

impl ChannelId {
    pub fn is_stderr(&self) -> bool {
        matches!(self, ChannelId::Stderr)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Stdout => write!(f, "stdout"),
            ChannelId::Stderr => write!(f, "stderr"),
            ChannelId::Fd(n) => write!(f, "fd{n}"),
            ChannelId::Stdin => write!(f, "stdin"),
        }
    }
}

impl Serialize for ChannelId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A complete line delivered by the multiplexer
#[derive(Debug, Clone)]
pub struct LineEvent {
    pub channel: ChannelId,
    pub text: String,
    /// 1-based position across all channels in arrival order
    pub number: u64,
    pub at: Instant,
}

/// Raw event emitted by a channel reader task
#[derive(Debug)]
pub enum ChannelEvent {
    Line {
        channel: ChannelId,
        text: String,
        at: Instant,
    },
    Closed {
        channel: ChannelId,
    },
    Failed {
        channel: ChannelId,
        error: std::io::Error,
    },
}

/// Everything that flows through the shared queue: channel output plus
/// control events from the other workers (timers, signals, reaper).
#[derive(Debug)]
pub enum MuxEvent<C> {
    Channel(ChannelEvent),
    Control(C),
}

/// Book-keeping for one readable source
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub id: ChannelId,
    pub first_activity: Option<Instant>,
    pub last_activity: Option<Instant>,
    pub lines: u64,
    pub eof: bool,
}

impl ChannelState {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            first_activity: None,
            last_activity: None,
            lines: 0,
            eof: false,
        }
    }

    pub(crate) fn touch(&mut self, at: Instant) {
        self.first_activity.get_or_insert(at);
        self.last_activity = Some(at);
        self.lines += 1;
    }
}

/// Result of waiting on the multiplexer
#[derive(Debug)]
pub enum MuxPoll<C> {
    Line(LineEvent),
    /// The wait timed out with nothing to report
    Idle,
    /// Every attached channel has reached end-of-stream
    AllChannelsClosed,
    Control(C),
}

/// Strip the line terminator (and the carriage return a tty adds) and decode
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    while end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"partial"), "partial");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn test_decode_line_is_lossy_on_invalid_utf8() {
        let decoded = decode_line(&[b'o', b'k', 0xff, b'\n']);
        assert!(decoded.starts_with("ok"));
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(ChannelId::Stdout.to_string(), "stdout");
        assert_eq!(ChannelId::Fd(3).to_string(), "fd3");
        assert!(ChannelId::Stderr.is_stderr());
        assert!(!ChannelId::Fd(2).is_stderr());
    }
}
