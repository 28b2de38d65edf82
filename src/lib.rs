//! # lookout
//!
//! Supervise a command (or a piped stream), watch its output live, and decide
//! when to stop waiting: on a pattern match, a timeout, or output that stopped
//! making progress.
//!
//! ## Usage
//!
//! ```bash
//! lookout --idle-timeout 30s 'Listening on' -- npm start
//! lookout --success 'BUILD SUCCESSFUL' --error 'FAILED' --exit-codes success-failure -- ./gradlew build
//! tail -f app.log | lookout -i 'panic'
//! ```
//!
//! ## Modules
//!
//! - `app` - Logging setup and fatal error reporting
//! - `cli` - Argument parsing and the watch command
//! - `config` - Profile loading and resolution into a `WatchConfig`
//! - `subprocess` - Launching the child and multiplexing its output channels
//! - `watch` - Matching, timeouts, stuck detection and the termination protocol
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod subprocess;
pub mod watch;

pub use error::LookoutError;
