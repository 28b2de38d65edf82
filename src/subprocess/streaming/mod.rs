//! Real-time streaming infrastructure for subprocess output
//!
//! This module provides line-by-line output capture and multiplexed stream
//! handling for supervised processes. Output becomes visible the moment a
//! line is complete instead of when a pipe buffer happens to flush.

pub mod multiplexer;
pub mod types;

pub use multiplexer::{EventSender, Multiplexer};
pub use types::{
    ChannelEvent, ChannelId, ChannelMode, ChannelState, LineEvent, MuxEvent, MuxPoll,
};
