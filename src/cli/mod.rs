//! CLI handling
//!
//! - Argument parsing structures
//! - The watch command

pub mod args;
pub mod commands;

pub use args::Cli;
pub use commands::run_watch_command;
