//! Command handlers

pub mod watch;

pub use watch::run_watch_command;
