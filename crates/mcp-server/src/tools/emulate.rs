use super::args::ToolArgs;
use crate::config::{resolve_against, ServerConfig};
use anyhow::Result;
use firmae_diagnostics::{
    classify, collect_failure_context, latest_run_dir, read_signals, FailureContext,
    SignalFiles,
};
use firmae_history::{
    parse_loose_bool, AnalysisSource, HistoryError, NewAnalysis, NewRun, RecordInputs, RunStore,
};
use firmae_protocol::ToolResult;
use firmae_runner::{display_command, Outcome, ProcessRunner};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

const RUN_SCRIPT: &str = "./run.sh";
const SUMMARY_CHARS: usize = 2000;
const NO_LOGS_NOTE: &str =
    "\n[analysis] Emulation appears to have failed before logs were produced in scratch/.";

/// What the logs of a failed attempt say.
#[derive(Debug, Default)]
struct FailureAnalysis {
    run_dir: Option<PathBuf>,
    reasons: Vec<&'static str>,
    block: String,
}

fn analyse(ctx: &FailureContext) -> FailureAnalysis {
    if !ctx.has_logs() {
        return FailureAnalysis {
            run_dir: ctx.run_dir.clone(),
            reasons: Vec::new(),
            block: NO_LOGS_NOTE.to_string(),
        };
    }

    let report = classify(&ctx.logs);
    let heading = if report.is_empty() {
        "**Failure analysis:**\n- No specific signature matched; review logs below.".to_string()
    } else {
        let mut text = "**Failure analysis (heuristics):**\n".to_string();
        for reason in report.labels() {
            text.push_str(&format!("- {reason}\n"));
        }
        text
    };

    let mut parts = vec![heading];
    for (name, tail) in ctx.logs.present() {
        parts.push(format!("\n--- {name} (tail) ---\n{tail}"));
    }
    FailureAnalysis {
        run_dir: ctx.run_dir.clone(),
        reasons: report.labels().to_vec(),
        block: parts.join("\n"),
    }
}

/// Exit code decides unless the result signal is trusted and readable.
fn attempt_failed(outcome: &Outcome, trust_result_file: bool, signals: &SignalFiles) -> bool {
    if trust_result_file {
        if let Some(ok) = signals.result.as_deref().and_then(parse_loose_bool) {
            return !ok;
        }
    }
    !outcome.success()
}

fn firmware_stem(fw_path: &Path) -> String {
    fw_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn record_inputs(fw_path: &Path, brand: &str, signals: SignalFiles, outcome: &Outcome) -> RecordInputs {
    RecordInputs {
        firmware_name: signals.name.unwrap_or_else(|| firmware_stem(fw_path)),
        architecture: signals.architecture.unwrap_or_default(),
        brand: signals.brand.unwrap_or_else(|| brand.to_string()),
        ping: signals.ping,
        web: signals.web,
        result: signals.result,
        result_fallback: outcome.exit_code == 0,
    }
}

fn persist_run(store: &RunStore, run: NewRun, analysis: NewAnalysis) -> Result<i64, HistoryError> {
    store.init()?;
    let run_id = store.insert_run(&run)?;
    store.insert_analysis(&NewAnalysis { run_id, ..analysis })
}

pub(super) async fn run(config: &ServerConfig, args: &ToolArgs) -> Result<ToolResult> {
    let (Some(brand), Some(firmware_file)) = (args.str("brand"), args.str("firmware_file")) else {
        return Ok(ToolResult::error("Missing brand or firmware_file"));
    };
    let fw_path = resolve_against(&config.firmae_home, firmware_file);
    if !fw_path.exists() {
        return Ok(ToolResult::error(format!(
            "Firmware file not found: {}",
            fw_path.display()
        )));
    }
    let timeout = args
        .positive_u64("timeout")
        .map(Duration::from_secs)
        .unwrap_or(config.emulate_timeout);

    let command_args = vec![
        "-c".to_string(),
        brand.to_string(),
        fw_path.display().to_string(),
    ];
    log::info!(
        "emulate: {} (timeout {}s)",
        display_command(RUN_SCRIPT, &command_args),
        timeout.as_secs()
    );
    let outcome = ProcessRunner::new(&config.firmae_home)
        .run(RUN_SCRIPT, &command_args, Some(timeout))
        .await;

    let scratch = config.scratch_dir();
    let signals = {
        let scratch = scratch.clone();
        tokio::task::spawn_blocking(move || {
            latest_run_dir(&scratch)
                .map(|dir| read_signals(&dir))
                .unwrap_or_default()
        })
        .await?
    };
    let is_error = attempt_failed(&outcome, config.trust_result_file, &signals);

    let ledger_note = match config
        .ledger()
        .append(record_inputs(&fw_path, brand, signals, &outcome))
        .await
    {
        Ok(_) => "\n[+] Emulation record appended to emulation_records.csv".to_string(),
        Err(err) => {
            log::warn!("ledger append failed: {err}");
            format!("\n[!] Failed to append emulation record: {err}")
        }
    };

    let analysis = if is_error {
        let ctx = tokio::task::spawn_blocking(move || collect_failure_context(&scratch)).await?;
        analyse(&ctx)
    } else {
        FailureAnalysis::default()
    };

    let mut lines = Vec::new();
    if !outcome.stdout.is_empty() {
        lines.push(outcome.stdout.clone());
    }
    if !outcome.stderr.is_empty() {
        lines.push(format!("[stderr]\n{}", outcome.stderr));
    }
    if !analysis.block.is_empty() {
        lines.push(analysis.block.clone());
    }
    lines.push(format!(
        "{}{ledger_note}",
        outcome.meta_line(&config.firmae_home)
    ));

    let content = if !analysis.block.is_empty() {
        analysis.block.clone()
    } else {
        let trimmed = outcome.stdout.trim();
        if trimmed.is_empty() {
            "[no analysis text]".to_string()
        } else {
            trimmed.chars().take(SUMMARY_CHARS).collect()
        }
    };
    let run = NewRun {
        brand: Some(brand.to_string()),
        model: None,
        firmware: fw_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        iid_dir: if is_error {
            analysis.run_dir.as_ref().map(|dir| dir.display().to_string())
        } else {
            None
        },
        exit_code: Some(outcome.exit_code),
        result: Some(!is_error),
        duration_sec: Some(outcome.duration.as_secs_f64()),
    };
    let new_analysis = if is_error {
        NewAnalysis {
            run_id: 0,
            source: AnalysisSource::Heuristic,
            summary: Some("Emulation failure analysis".to_string()),
            content,
            reasons: Some(json!({ "reasons": analysis.reasons })),
        }
    } else {
        NewAnalysis {
            run_id: 0,
            source: AnalysisSource::Summary,
            summary: Some("Emulation summary".to_string()),
            content,
            reasons: None,
        }
    };

    let store = config.run_store();
    match tokio::task::spawn_blocking(move || persist_run(&store, run, new_analysis)).await {
        Ok(Ok(analysis_id)) => log::info!("stored emulation analysis #{analysis_id}"),
        Ok(Err(err)) => {
            log::warn!("run store write failed: {err}");
            lines.push(format!("\n[KB] Failed to persist analysis: {err}"));
        }
        Err(err) => {
            log::warn!("run store task failed: {err}");
            lines.push(format!("\n[KB] Failed to persist analysis: {err}"));
        }
    }

    Ok(ToolResult::text(lines.join("\n"), is_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use firmae_diagnostics::LogBundle;
    use pretty_assertions::assert_eq;

    fn ctx(logs: LogBundle) -> FailureContext {
        FailureContext {
            run_dir: Some(PathBuf::from("/fw/scratch/3")),
            logs,
        }
    }

    #[test]
    fn analysis_lists_reasons_then_tails() {
        let analysis = analyse(&ctx(
            LogBundle::new()
                .with("qemu.final.serial.log", "Kernel panic - not syncing")
                .with("makeImage.log", "ok"),
        ));
        assert_eq!(analysis.reasons, vec!["QEMU boot/kernel failure"]);
        assert_eq!(
            analysis.block,
            "**Failure analysis (heuristics):**\n- QEMU boot/kernel failure\n\
             \n\n--- makeImage.log (tail) ---\nok\
             \n\n--- qemu.final.serial.log (tail) ---\nKernel panic - not syncing"
        );
    }

    #[test]
    fn unmatched_logs_ask_for_manual_review() {
        let analysis = analyse(&ctx(LogBundle::new().with("emulation.log", "all quiet")));
        assert!(analysis.reasons.is_empty());
        assert!(analysis
            .block
            .starts_with("**Failure analysis:**\n- No specific signature matched"));
        assert!(analysis.block.ends_with("--- emulation.log (tail) ---\nall quiet"));
    }

    #[test]
    fn missing_logs_are_reported_as_early_failure() {
        let analysis = analyse(&ctx(LogBundle::new()));
        assert_eq!(analysis.block, NO_LOGS_NOTE);
        let analysis = analyse(&FailureContext::default());
        assert_eq!(analysis.block, NO_LOGS_NOTE);
    }

    #[test]
    fn record_inputs_fall_back_to_arguments() {
        let outcome = outcome_with_exit(0);
        let inputs = record_inputs(
            Path::new("/fw/DIR-868L_fw.bin"),
            "DLINK",
            SignalFiles::default(),
            &outcome,
        );
        assert_eq!(inputs.firmware_name, "DIR-868L_fw");
        assert_eq!(inputs.brand, "DLINK");
        assert_eq!(inputs.architecture, "");
        assert!(inputs.result_fallback);
    }

    #[test]
    fn result_signal_only_decides_when_trusted() {
        let signals = SignalFiles {
            result: Some("true".to_string()),
            ..SignalFiles::default()
        };
        let failed = outcome_with_exit(1);
        assert!(attempt_failed(&failed, false, &signals));
        assert!(!attempt_failed(&failed, true, &signals));
        assert!(attempt_failed(&failed, true, &SignalFiles::default()));
    }

    fn home_with_run_script(home: &Path) -> ServerConfig {
        use std::os::unix::fs::PermissionsExt;

        let script = home.join("run.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"emulated $2\"\n").expect("script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        std::fs::write(home.join("fw.bin"), b"\x00").expect("firmware");
        ServerConfig::for_home(home)
    }

    async fn emulate_fw(config: &ServerConfig) -> ToolResult {
        run(
            config,
            &ToolArgs::new(json!({ "brand": "DLINK", "firmware_file": "fw.bin" })),
        )
        .await
        .expect("emulate")
    }

    #[tokio::test]
    async fn run_store_failure_becomes_a_note() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = home_with_run_script(dir.path());
        config.kb_db = dir.path().join("kb-is-a-dir");
        std::fs::create_dir(&config.kb_db).expect("mkdir");

        let result = emulate_fw(&config).await;
        let text = result.joined_text();
        assert!(!result.is_error, "{text}");
        assert!(text.starts_with("emulated DLINK"), "{text}");
        assert!(text.contains("[+] Emulation record appended to emulation_records.csv"));
        assert!(text.contains("\n[KB] Failed to persist analysis: "), "{text}");
    }

    #[tokio::test]
    async fn ledger_failure_becomes_a_note() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = home_with_run_script(dir.path());
        std::fs::create_dir(dir.path().join("emulation_records.csv")).expect("mkdir");

        let result = tokio::time::timeout(Duration::from_secs(30), emulate_fw(&config))
            .await
            .expect("emulate replies");
        let text = result.joined_text();
        assert!(!result.is_error, "{text}");
        assert!(text.contains("\n[!] Failed to append emulation record: "), "{text}");
        assert!(!text.contains("[KB] Failed"), "{text}");

        let stored = config.run_store().latest_analyses(5).expect("latest");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, "summary");
    }

    fn outcome_with_exit(code: i32) -> Outcome {
        Outcome {
            kind: firmae_runner::OutcomeKind::Exited,
            exit_code: code,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(10),
        }
    }
}
