use crate::outcome::Outcome;
use crate::sanitize::decode_output;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// How long to keep draining pipes after the process itself is gone. Background children that
/// inherited stdout/stderr can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(2);

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Executes commands rooted at one working directory.
///
/// The directory is passed to every child explicitly; the server's own working directory is
/// never touched.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    workdir: PathBuf,
}

impl ProcessRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Run `program` with `args`, waiting at most `timeout` (no limit when `None`).
    pub async fn run(&self, program: &str, args: &[String], timeout: Option<Duration>) -> Outcome {
        let start = Instant::now();

        if !self.workdir.is_dir() {
            return Outcome::launch_failed(
                format!("working directory not found: {}", self.workdir.display()),
                start.elapsed(),
            );
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("command not found: {program}: {err}");
                return Outcome::not_found(err, start.elapsed());
            }
            Err(err) => {
                log::warn!("failed to launch {program}: {err}");
                return Outcome::launch_failed(err, start.elapsed());
            }
        };

        let stdout_buf = SharedBuf::default();
        let stderr_buf = SharedBuf::default();
        let mut drains = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            drains.push(tokio::spawn(drain(out, stdout_buf.clone())));
        }
        if let Some(err) = child.stderr.take() {
            drains.push(tokio::spawn(drain(err, stderr_buf.clone())));
        }

        let waited = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        match waited {
            Some(Ok(status)) => {
                finish_drains(drains, DRAIN_GRACE).await;
                Outcome::exited(
                    exit_code_of(status),
                    snapshot(&stdout_buf),
                    snapshot(&stderr_buf),
                    start.elapsed(),
                )
            }
            Some(Err(err)) => {
                kill_tree(&mut child).await;
                finish_drains(drains, KILL_GRACE).await;
                Outcome::launch_failed(err, start.elapsed())
            }
            None => {
                log::warn!(
                    "command timed out after {:.1}s: {program}",
                    start.elapsed().as_secs_f64()
                );
                kill_tree(&mut child).await;
                finish_drains(drains, KILL_GRACE).await;
                Outcome::timed_out(snapshot(&stdout_buf), snapshot(&stderr_buf), start.elapsed())
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: SharedBuf) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut guard) = sink.lock() {
                    guard.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

async fn finish_drains(drains: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    for handle in drains {
        let abort = handle.abort_handle();
        if tokio::time::timeout_at(deadline, handle).await.is_err() {
            abort.abort();
        }
    }
}

fn snapshot(buf: &SharedBuf) -> String {
    buf.lock()
        .map(|guard| decode_output(&guard))
        .unwrap_or_default()
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // The child leads its own process group, so this reaches anything it spawned.
            unsafe {
                let _ = libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    let _ = child.start_kill();
    let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    crate::outcome::EXIT_LAUNCH_ERROR
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{OutcomeKind, EXIT_NOT_FOUND, EXIT_TIMEOUT, TIMEOUT_MARKER};
    use pretty_assertions::assert_eq;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_real_exit_code_and_sanitized_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::new(dir.path());
        let outcome = runner
            .run(
                "sh",
                &sh(r"printf 'plain \033[31mred\033[0m'; echo oops >&2; exit 3"),
                Some(Duration::from_secs(10)),
            )
            .await;

        assert_eq!(outcome.kind, OutcomeKind::Exited);
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout, "plain red");
        assert_eq!(outcome.stderr, "oops\n");
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn runs_inside_the_configured_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::new(dir.path());
        let outcome = runner.run("pwd", &[], None).await;

        assert!(outcome.success(), "{outcome:?}");
        let reported = PathBuf::from(outcome.stdout.trim())
            .canonicalize()
            .expect("canonical pwd");
        assert_eq!(reported, dir.path().canonicalize().expect("canonical dir"));
    }

    #[tokio::test]
    async fn timeout_keeps_partial_output_and_marks_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::new(dir.path());
        let outcome = runner
            .run(
                "sh",
                &sh("echo started; echo warming >&2; sleep 30"),
                Some(Duration::from_millis(500)),
            )
            .await;

        assert_eq!(outcome.kind, OutcomeKind::TimedOut);
        assert_eq!(outcome.exit_code, EXIT_TIMEOUT);
        assert!(outcome.stdout.contains("started"), "{outcome:?}");
        assert!(outcome.stderr.starts_with("warming"), "{outcome:?}");
        assert!(outcome.stderr.ends_with(TIMEOUT_MARKER));
        assert!(outcome.duration < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn missing_executable_maps_to_127() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::new(dir.path());
        let outcome = runner
            .run("./definitely-not-here.sh", &[], Some(Duration::from_secs(5)))
            .await;

        assert_eq!(outcome.kind, OutcomeKind::NotFound);
        assert_eq!(outcome.exit_code, EXIT_NOT_FOUND);
        assert!(outcome.stderr.starts_with("[error] "));
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn missing_working_directory_is_a_launch_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = ProcessRunner::new(dir.path().join("gone"));
        let outcome = runner.run("true", &[], None).await;

        assert_eq!(outcome.kind, OutcomeKind::LaunchFailed);
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.stderr.contains("working directory not found"));
    }

    #[tokio::test]
    async fn non_executable_file_is_a_launch_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("run.sh"), "#!/bin/sh\necho hi\n").expect("write");
        let runner = ProcessRunner::new(dir.path());
        let outcome = runner.run("./run.sh", &[], None).await;

        assert_eq!(outcome.kind, OutcomeKind::LaunchFailed);
        assert_eq!(outcome.exit_code, 1);
    }
}
