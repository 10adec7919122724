use std::path::Path;
use std::time::Duration;

pub const EXIT_TIMEOUT: i32 = 124;
pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_LAUNCH_ERROR: i32 = 1;

/// Appended to stderr when the deadline passes.
pub const TIMEOUT_MARKER: &str = "[timeout]";

/// Which branch produced the outcome. Lets callers tell a sentinel exit code apart from a real
/// process that happened to exit with the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Exited,
    TimedOut,
    NotFound,
    LaunchFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl Outcome {
    pub(crate) fn exited(exit_code: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            kind: OutcomeKind::Exited,
            exit_code,
            stdout,
            stderr,
            duration,
        }
    }

    pub(crate) fn timed_out(stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            kind: OutcomeKind::TimedOut,
            exit_code: EXIT_TIMEOUT,
            stdout,
            stderr: format!("{stderr}\n{TIMEOUT_MARKER}"),
            duration,
        }
    }

    pub(crate) fn not_found(detail: impl std::fmt::Display, duration: Duration) -> Self {
        Self {
            kind: OutcomeKind::NotFound,
            exit_code: EXIT_NOT_FOUND,
            stdout: String::new(),
            stderr: format!("[error] {detail}"),
            duration,
        }
    }

    pub(crate) fn launch_failed(detail: impl std::fmt::Display, duration: Duration) -> Self {
        Self {
            kind: OutcomeKind::LaunchFailed,
            exit_code: EXIT_LAUNCH_ERROR,
            stdout: String::new(),
            stderr: format!("[error] {detail}"),
            duration,
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.kind == OutcomeKind::Exited && self.exit_code == 0
    }

    /// `[exit=<code>] [duration=<secs>s] [cwd=<dir>]`
    #[must_use]
    pub fn meta_line(&self, cwd: &Path) -> String {
        format!(
            "[exit={}] [duration={:.2}s] [cwd={}]",
            self.exit_code,
            self.duration.as_secs_f64(),
            cwd.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_marker_terminates_stderr() {
        let outcome = Outcome::timed_out("partial".into(), String::new(), Duration::ZERO);
        assert_eq!(outcome.exit_code, EXIT_TIMEOUT);
        assert!(outcome.stderr.ends_with(TIMEOUT_MARKER));
        assert!(!outcome.success());
    }

    #[test]
    fn meta_line_formats_two_decimals() {
        let outcome = Outcome::exited(0, String::new(), String::new(), Duration::from_millis(1500));
        assert_eq!(
            outcome.meta_line(Path::new("/opt/FirmAE")),
            "[exit=0] [duration=1.50s] [cwd=/opt/FirmAE]"
        );
    }
}
