//! Error handling utilities
//!
//! This module provides centralized error handling for the application.

use crate::error::LookoutError;
use crate::watch::codes;
use tracing::debug;

/// Report a failure that kept the run from starting and exit.
///
/// Always one line on stderr, starting with the cause identifier. With
/// `--verbose` the full error chain follows.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    debug!("Fatal error: {:#}", error);

    let exit_code = match error.downcast_ref::<LookoutError>() {
        Some(lookout_err) => {
            eprintln!("{}", lookout_err.user_message());
            lookout_err.exit_code()
        }
        None => {
            eprintln!("lookout: error: {error}");
            codes::CONFIG_ERROR
        }
    };

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code)
}
