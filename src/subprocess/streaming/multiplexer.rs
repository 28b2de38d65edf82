//! Readiness-driven multiplexing of child output channels
//!
//! Each attached channel gets its own reader task which only suspends on
//! "more data or end-of-stream". Readers, timers and the signal forwarder all
//! push into one bounded, ordered queue; the multiplexer is its sole consumer.

use super::types::{
    decode_line, ChannelEvent, ChannelId, ChannelState, LineEvent, MuxEvent, MuxPoll,
    EVENT_QUEUE_CAPACITY, LINE_BUFFER_SIZE,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

pub type EventSender<C> = mpsc::Sender<MuxEvent<C>>;

pub struct Multiplexer<C> {
    tx: EventSender<C>,
    rx: mpsc::Receiver<MuxEvent<C>>,
    channels: BTreeMap<ChannelId, ChannelState>,
    readers: Vec<JoinHandle<()>>,
    next_number: u64,
}

impl<C: Send + 'static> Default for Multiplexer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> Multiplexer<C> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            channels: BTreeMap::new(),
            readers: Vec::new(),
            next_number: 1,
        }
    }

    /// Sender handed to the non-channel producers
    pub fn sender(&self) -> EventSender<C> {
        self.tx.clone()
    }

    /// Start reading `reader` as channel `id`
    pub fn attach<R>(&mut self, id: ChannelId, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        debug!("Attaching channel {}", id);
        self.channels.insert(id, ChannelState::new(id));
        let tx = self.tx.clone();
        self.readers
            .push(tokio::spawn(async move { pump(id, reader, tx).await }));
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelState> {
        self.channels.get(&id)
    }

    pub fn all_closed(&self) -> bool {
        self.channels.values().all(|c| c.eof)
    }

    /// Lines delivered so far
    pub fn lines_delivered(&self) -> u64 {
        self.next_number - 1
    }

    /// Wait for the next complete line, control event, or end of all channels.
    ///
    /// With `timeout` set, returns [`MuxPoll::Idle`] if nothing arrives in time.
    /// Once every channel is closed, queued control events are still drained
    /// before `AllChannelsClosed` is reported, and it is reported on every call
    /// after that.
    pub async fn next_line(&mut self, timeout: Option<Duration>) -> MuxPoll<C> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.all_closed() {
                return match self.rx.try_recv() {
                    Ok(MuxEvent::Control(control)) => MuxPoll::Control(control),
                    Ok(MuxEvent::Channel(_)) => continue,
                    Err(_) => MuxPoll::AllChannelsClosed,
                };
            }

            let event = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(event) => event,
                    Err(_) => return MuxPoll::Idle,
                },
                None => self.rx.recv().await,
            };

            // We hold a sender ourselves, so the queue never closes while we live.
            let Some(event) = event else {
                return MuxPoll::AllChannelsClosed;
            };

            if let Some(poll) = self.absorb(event) {
                return poll;
            }
        }
    }

    /// Non-blocking variant used to drain everything already queued
    pub fn try_next(&mut self) -> Option<MuxPoll<C>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(poll) = self.absorb(event) {
                        return Some(poll);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Abort the reader tasks; lines still in flight are dropped
    pub fn shutdown(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }

    fn absorb(&mut self, event: MuxEvent<C>) -> Option<MuxPoll<C>> {
        match event {
            MuxEvent::Control(control) => Some(MuxPoll::Control(control)),
            MuxEvent::Channel(ChannelEvent::Line { channel, text, at }) => {
                if let Some(state) = self.channels.get_mut(&channel) {
                    state.touch(at);
                }
                let number = self.next_number;
                self.next_number += 1;
                trace!("{} #{}: {}", channel, number, text);
                Some(MuxPoll::Line(LineEvent {
                    channel,
                    text,
                    number,
                    at,
                }))
            }
            MuxEvent::Channel(ChannelEvent::Closed { channel }) => self.close(channel),
            MuxEvent::Channel(ChannelEvent::Failed { channel, error }) => {
                warn!("Read error on {}, closing channel: {}", channel, error);
                self.close(channel)
            }
        }
    }

    fn close(&mut self, channel: ChannelId) -> Option<MuxPoll<C>> {
        if let Some(state) = self.channels.get_mut(&channel) {
            if state.eof {
                return None;
            }
            state.eof = true;
        }
        debug!("Channel {} reached end-of-stream", channel);
        if self.all_closed() {
            Some(MuxPoll::AllChannelsClosed)
        } else {
            None
        }
    }
}

impl<C> Drop for Multiplexer<C> {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Read one channel line by line until end-of-stream or error.
///
/// A trailing line without a terminator is still delivered at EOF.
async fn pump<R, C>(channel: ChannelId, reader: R, tx: EventSender<C>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(LINE_BUFFER_SIZE, reader);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let event = match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => ChannelEvent::Closed { channel },
            Ok(_) => ChannelEvent::Line {
                channel,
                text: decode_line(&buf),
                at: Instant::now(),
            },
            Err(error) => ChannelEvent::Failed { channel, error },
        };

        let done = !matches!(event, ChannelEvent::Line { .. });
        if tx.send(MuxEvent::Channel(event)).await.is_err() || done {
            break;
        }
    }
}
