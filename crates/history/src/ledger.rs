use crate::{HistoryError, Result};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LEDGER_HEADER: [&str; 7] = [
    "number",
    "firmware_name",
    "architecture",
    "brand",
    "ping",
    "web",
    "result",
];

const TRUTHY: &[&str] = &[
    "1", "true", "yes", "y", "ok", "success", "on", "reachable", "up",
];
const FALSY: &[&str] = &[
    "0", "false", "no", "n", "fail", "failed", "off", "unreachable", "down",
];

/// Interpret free-form signal text as a boolean.
///
/// Known tokens are matched case-insensitively; anything else that parses as a number is `true`
/// when non-zero. Returns `None` when the text carries no usable signal.
#[must_use]
pub fn parse_loose_bool(text: &str) -> Option<bool> {
    let token = text.trim().to_ascii_lowercase();
    if token.is_empty() {
        return None;
    }
    if TRUTHY.contains(&token.as_str()) {
        return Some(true);
    }
    if FALSY.contains(&token.as_str()) {
        return Some(false);
    }
    token
        .parse::<f64>()
        .ok()
        .filter(|n| !n.is_nan())
        .map(|n| n != 0.0)
}

/// Raw values for one ledger row, as read from an attempt's signal files.
///
/// `ping` and `web` fall back to `false` when absent or unparseable; `result` falls back to
/// `result_fallback` (normally "the emulator exited with 0").
#[derive(Debug, Clone, Default)]
pub struct RecordInputs {
    pub firmware_name: String,
    pub architecture: String,
    pub brand: String,
    pub ping: Option<String>,
    pub web: Option<String>,
    pub result: Option<String>,
    pub result_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub number: u64,
    pub firmware_name: String,
    pub architecture: String,
    pub brand: String,
    pub ping: bool,
    pub web: bool,
    pub result: bool,
}

impl HistoryRecord {
    fn from_inputs(number: u64, inputs: RecordInputs) -> Self {
        let flag = |raw: &Option<String>, fallback: bool| {
            raw.as_deref().and_then(parse_loose_bool).unwrap_or(fallback)
        };
        Self {
            number,
            ping: flag(&inputs.ping, false),
            web: flag(&inputs.web, false),
            result: flag(&inputs.result, inputs.result_fallback),
            firmware_name: inputs.firmware_name,
            architecture: inputs.architecture,
            brand: inputs.brand,
        }
    }

    fn to_row(&self) -> [String; 7] {
        let flag = |b: bool| if b { "true" } else { "false" }.to_string();
        [
            self.number.to_string(),
            self.firmware_name.clone(),
            self.architecture.clone(),
            self.brand.clone(),
            flag(self.ping),
            flag(self.web),
            flag(self.result),
        ]
    }

    fn from_row(row: &csv::StringRecord) -> Self {
        let text = |idx: usize| row.get(idx).unwrap_or("").to_string();
        let flag = |idx: usize| row.get(idx).and_then(parse_loose_bool).unwrap_or(false);
        Self {
            number: row.get(0).and_then(|n| n.trim().parse().ok()).unwrap_or(0),
            firmware_name: text(1),
            architecture: text(2),
            brand: text(3),
            ping: flag(4),
            web: flag(5),
            result: flag(6),
        }
    }
}

/// Append-only CSV ledger of emulation attempts.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

struct LedgerLock {
    file: File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn acquire_lock(&self) -> Result<LedgerLock> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| HistoryError::Other(format!("open ledger lock {}: {err}", path.display())))?;
        file.lock_exclusive().map_err(|err| {
            HistoryError::Other(format!("acquire ledger lock {}: {err}", path.display()))
        })?;
        Ok(LedgerLock { file })
    }

    /// Sequence number the next appended row will carry.
    ///
    /// Normally one more than the largest number in the file. When the last row's first column
    /// is not an integer (or the file cannot be parsed) this falls back to counting lines minus
    /// the header, floored at 1. Fails only when the file cannot be read at all.
    pub fn next_sequence_number(&self) -> Result<u64> {
        if !self.path.exists() {
            return Ok(1);
        }
        match self.max_number_if_last_row_valid() {
            Ok(Some(max)) => Ok(max.saturating_add(1)),
            Ok(None) => Ok(1),
            Err(reason) => {
                log::warn!(
                    "ledger {} has no parseable sequence ({reason}); counting rows",
                    self.path.display()
                );
                self.sequence_from_line_count()
            }
        }
    }

    /// `Ok(None)` for a ledger with no data rows.
    fn max_number_if_last_row_valid(&self) -> std::result::Result<Option<u64>, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|err| err.to_string())?;

        let mut max = None::<u64>;
        let mut last_valid = true;
        let mut seen_rows = false;
        for row in reader.records() {
            let row = row.map_err(|err| err.to_string())?;
            if row.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            seen_rows = true;
            match row.get(0).and_then(|n| n.trim().parse::<u64>().ok()) {
                Some(number) => {
                    last_valid = true;
                    max = Some(max.map_or(number, |m| m.max(number)));
                }
                None => last_valid = false,
            }
        }
        match (seen_rows, last_valid) {
            (false, _) => Ok(None),
            (true, true) => Ok(max),
            (true, false) => Err("last row has a non-numeric sequence".to_string()),
        }
    }

    fn sequence_from_line_count(&self) -> Result<u64> {
        // Rows below the header, plus one.
        let bytes = fs::read(&self.path)?;
        let newlines = bytes.iter().filter(|b| **b == b'\n').count();
        let unterminated = bytes.last().is_some_and(|b| *b != b'\n');
        Ok(((newlines + usize::from(unterminated)) as u64).max(1))
    }

    /// Whether a non-empty ledger is missing its final line terminator.
    fn lacks_trailing_newline(&self) -> Result<bool> {
        let mut file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }

    fn append_blocking(&self, inputs: RecordInputs) -> Result<HistoryRecord> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let _lock = self.acquire_lock()?;

        let record = HistoryRecord::from_inputs(self.next_sequence_number()?, inputs);
        let is_new = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => return Err(err.into()),
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if !is_new && self.lacks_trailing_newline()? {
            file.write_all(b"\n")?;
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(LEDGER_HEADER)?;
        }
        writer.write_record(record.to_row())?;
        writer.flush()?;
        Ok(record)
    }

    /// Append one row, returning it with its assigned sequence number.
    pub async fn append(&self, inputs: RecordInputs) -> Result<HistoryRecord> {
        let ledger = self.clone();
        let record = tokio::task::spawn_blocking(move || ledger.append_blocking(inputs)).await??;
        log::info!(
            "ledger {}: appended #{} ({})",
            self.path.display(),
            record.number,
            record.firmware_name
        );
        Ok(record)
    }

    /// All rows in file order. A missing ledger reads as empty; malformed rows are skipped.
    pub async fn read_records(&self) -> Result<Vec<HistoryRecord>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<HistoryRecord>> {
            let mut reader = match csv::ReaderBuilder::new()
                .has_headers(true)
                .flexible(true)
                .from_path(&path)
            {
                Ok(reader) => reader,
                Err(err) => {
                    if let csv::ErrorKind::Io(io) = err.kind() {
                        if io.kind() == ErrorKind::NotFound {
                            return Ok(Vec::new());
                        }
                    }
                    return Err(err.into());
                }
            };
            Ok(reader
                .records()
                .filter_map(|row| row.ok())
                .filter(|row| !row.iter().all(|field| field.trim().is_empty()))
                .map(|row| HistoryRecord::from_row(&row))
                .collect())
        })
        .await?
    }
}
