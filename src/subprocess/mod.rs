//! Child process plumbing: launching, descriptor handling and line streaming.

pub mod builder;
pub mod error;
pub mod fd;
pub mod launcher;
pub mod streaming;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use fd::FdReader;
pub use launcher::{launch, ChannelReader, LaunchedChild, ProcessCommand};
