use crate::classifier::{LogBundle, LOG_NAMES};
use crate::tail::{tail_text, DEFAULT_TAIL_BYTES, DEFAULT_TAIL_LINES};
use std::fs;
use std::path::{Path, PathBuf};

/// Numeric run directory names under `scratch`, ascending.
#[must_use]
pub fn numeric_run_ids(scratch: &Path) -> Vec<u64> {
    let Ok(entries) = fs::read_dir(scratch) else {
        return Vec::new();
    };
    let mut ids: Vec<u64> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            name.parse().ok()
        })
        .collect();
    ids.sort_unstable();
    ids
}

/// The directory of the most recent attempt: the numerically largest run id.
#[must_use]
pub fn latest_run_dir(scratch: &Path) -> Option<PathBuf> {
    numeric_run_ids(scratch)
        .last()
        .map(|id| scratch.join(id.to_string()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureContext {
    pub run_dir: Option<PathBuf>,
    pub logs: LogBundle,
}

impl FailureContext {
    /// `false` when the attempt failed before writing any log.
    #[must_use]
    pub fn has_logs(&self) -> bool {
        self.run_dir.is_some() && !self.logs.is_empty()
    }
}

/// Tail every known log of the newest attempt in `scratch`.
#[must_use]
pub fn collect_failure_context(scratch: &Path) -> FailureContext {
    let Some(run_dir) = latest_run_dir(scratch) else {
        return FailureContext::default();
    };
    let mut logs = LogBundle::new();
    for name in LOG_NAMES {
        logs.set(name, tail_text(&run_dir.join(name), DEFAULT_TAIL_BYTES, DEFAULT_TAIL_LINES));
    }
    FailureContext {
        run_dir: Some(run_dir),
        logs,
    }
}

/// Raw contents of the per-attempt signal files; absent or blank files are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalFiles {
    pub name: Option<String>,
    pub architecture: Option<String>,
    pub brand: Option<String>,
    pub ping: Option<String>,
    pub web: Option<String>,
    pub result: Option<String>,
}

#[must_use]
pub fn read_signals(run_dir: &Path) -> SignalFiles {
    let read = |file: &str| -> Option<String> {
        let text = fs::read_to_string(run_dir.join(file)).ok()?;
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };
    SignalFiles {
        name: read("name"),
        architecture: read("architecture"),
        brand: read("brand"),
        ping: read("ping"),
        web: read("web"),
        result: read("result"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn latest_dir_is_numeric_not_lexicographic() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["2", "10", "9", "notes", "11a"] {
            fs::create_dir(dir.path().join(name)).expect("mkdir");
        }
        fs::write(dir.path().join("42"), "a file, not a run").expect("write");

        assert_eq!(numeric_run_ids(dir.path()), vec![2, 9, 10]);
        assert_eq!(latest_run_dir(dir.path()), Some(dir.path().join("10")));
    }

    #[test]
    fn missing_scratch_has_no_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = collect_failure_context(&dir.path().join("scratch"));
        assert_eq!(ctx, FailureContext::default());
        assert!(!ctx.has_logs());
    }

    #[test]
    fn collects_tails_from_newest_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = dir.path().join("1");
        let new = dir.path().join("3");
        fs::create_dir_all(&old).expect("mkdir");
        fs::create_dir_all(&new).expect("mkdir");
        fs::write(old.join("emulation.log"), "stale").expect("write");
        fs::write(new.join("makeNetwork.log"), "Network reachable on 10.0.0.1\n").expect("write");

        let ctx = collect_failure_context(dir.path());
        assert_eq!(ctx.run_dir.as_deref(), Some(new.as_path()));
        assert!(ctx.has_logs());
        assert_eq!(ctx.logs.get("makeNetwork.log"), "Network reachable on 10.0.0.1");
        assert_eq!(ctx.logs.get("emulation.log"), "");
    }

    #[test]
    fn run_dir_without_logs_reports_no_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("5")).expect("mkdir");
        let ctx = collect_failure_context(dir.path());
        assert!(ctx.run_dir.is_some());
        assert!(!ctx.has_logs());
    }

    #[test]
    fn signals_are_trimmed_and_blank_is_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("name"), "DIR-868L.bin\n").expect("write");
        fs::write(dir.path().join("ping"), " true \n").expect("write");
        fs::write(dir.path().join("web"), "\n").expect("write");

        let signals = read_signals(dir.path());
        assert_eq!(signals.name.as_deref(), Some("DIR-868L.bin"));
        assert_eq!(signals.ping.as_deref(), Some("true"));
        assert_eq!(signals.web, None);
        assert_eq!(signals.result, None);
    }
}
