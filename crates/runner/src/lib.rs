//! # FirmAE Runner
//!
//! Runs one external command rooted at a fixed working directory, waits up to a timeout, and
//! folds every way that can go wrong into an [`Outcome`]:
//!
//! ```text
//! exit      stderr                      kind
//! <code>    process stderr              Exited
//! 124       captured stderr + [timeout] TimedOut
//! 127       [error] <spawn error>       NotFound
//! 1         [error] <error>             LaunchFailed
//! ```
//!
//! Nothing is retried; the caller decides.

mod outcome;
mod process;
mod sanitize;

pub use outcome::{
    Outcome, OutcomeKind, EXIT_LAUNCH_ERROR, EXIT_NOT_FOUND, EXIT_TIMEOUT, TIMEOUT_MARKER,
};
pub use process::ProcessRunner;
pub use sanitize::{display_command, strip_ansi};
