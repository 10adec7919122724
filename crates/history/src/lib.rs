//! Durable history of emulation attempts.
//!
//! Two independent sinks are written for every attempt:
//!
//! - [`Ledger`]: an append-only CSV file (`emulation_records.csv`) with one row per attempt and a
//!   sequence number recovered from the file itself.
//! - [`RunStore`]: a SQLite database with `runs`, `analyses` and an FTS5 index over analysis
//!   text, used to look past failures up again.

mod error;
mod ledger;
mod store;

pub use error::{HistoryError, Result};
pub use ledger::{parse_loose_bool, HistoryRecord, Ledger, RecordInputs, LEDGER_HEADER};
pub use store::{
    AnalysisRecord, AnalysisSource, NewAnalysis, NewRun, RunStore, DEFAULT_MAX_CONTENT,
    TRUNCATION_MARKER,
};
