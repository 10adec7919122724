//! # FirmAE Diagnostics
//!
//! Turns the logs of the most recent emulation attempt into human-readable failure categories.
//!
//! ```text
//! scratch/<n>/            newest numeric run directory
//!     ├─ makeImage.log ─┐
//!     ├─ makeNetwork.log├─> tail (bounded bytes + lines) ─> LogBundle ─> classify ─> FailureReport
//!     ├─ qemu.final.serial.log
//!     └─ emulation.log ─┘
//! ```

mod classifier;
mod scratch;
mod tail;

pub use classifier::{classify, labels, FailureReport, LogBundle, LOG_NAMES};
pub use scratch::{
    collect_failure_context, latest_run_dir, numeric_run_ids, read_signals, FailureContext,
    SignalFiles,
};
pub use tail::{tail_text, DEFAULT_TAIL_BYTES, DEFAULT_TAIL_LINES};
