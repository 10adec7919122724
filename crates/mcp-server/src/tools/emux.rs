use super::args::ToolArgs;
use crate::config::ServerConfig;
use anyhow::Result;
use firmae_protocol::ToolResult;
use firmae_runner::{display_command, Outcome, ProcessRunner};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEVICE_COLUMNS: [&str; 9] = [
    "ID",
    "qemu-binary",
    "machine-type",
    "cpu-type",
    "dtb",
    "memory",
    "kernel-image",
    "qemuopts",
    "description",
];
const DEVICE_TARGETS: [&str; 2] = ["devices", "devices-extra"];
const TAIL_PREVIEW_LINES: usize = 5;

const VOLUME_SCRIPT: &str = "./build-emux-volume";
const DOCKER_SCRIPT: &str = "./build-emux-docker";

fn devices_header() -> String {
    DEVICE_COLUMNS.join(",")
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Split one CSV line into its fields.
fn parse_csv_line(line: &str) -> std::result::Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(record) => Ok(record?.iter().map(str::to_string).collect()),
        None => Ok(Vec::new()),
    }
}

/// Build a device row from a `fields` object; every column must be present.
fn row_from_fields(fields: &Map<String, Value>) -> std::result::Result<String, String> {
    let missing: Vec<&str> = DEVICE_COLUMNS
        .iter()
        .copied()
        .filter(|column| !fields.contains_key(*column))
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "Missing fields for CSV build: {}",
            missing.join(", ")
        ));
    }

    let values: Vec<String> = DEVICE_COLUMNS
        .iter()
        .map(|column| match &fields[*column] {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(&values).map_err(|err| err.to_string())?;
    let bytes = writer.into_inner().map_err(|err| err.to_string())?;
    Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
}

/// Upsert request for one devices file.
#[derive(Debug)]
struct DeviceUpsert {
    path: PathBuf,
    id: String,
    row: String,
    allow_update: bool,
    create_backup: bool,
}

fn backup_note(path: &Path) -> String {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let backup = PathBuf::from(format!("{}.bak.{stamp}", path.display()));
    match std::fs::copy(path, &backup) {
        Ok(_) => format!("Backup created: {}", backup.display()),
        Err(err) => {
            log::warn!("backup of {} failed: {err}", path.display());
            format!("Backup failed: {err}")
        }
    }
}

fn apply_upsert(req: &DeviceUpsert) -> ToolResult {
    if let Some(parent) = req.path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            return ToolResult::error(format!("Failed to create {}: {err}", parent.display()));
        }
    }

    let existing: Vec<String> = if req.path.exists() {
        match std::fs::read_to_string(&req.path) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(err) => {
                return ToolResult::error(format!(
                    "Failed to read {}: {err}",
                    req.path.display()
                ));
            }
        }
    } else {
        Vec::new()
    };
    let header = devices_header();
    let had_header = existing
        .first()
        .is_some_and(|first| strip_whitespace(first) == header);

    let mut notes = Vec::new();
    if req.create_backup && req.path.exists() {
        notes.push(backup_note(&req.path));
    }

    // A file without a valid header keeps every line below a fresh one.
    let mut body: Vec<String> = if had_header {
        existing[1..].to_vec()
    } else {
        existing
    };
    let mut replaced = false;
    if req.allow_update {
        for line in body.iter_mut() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Ok(cols) = parse_csv_line(line) else {
                continue;
            };
            if cols.first().is_some_and(|first| first.trim() == req.id) {
                *line = req.row.clone();
                replaced = true;
                break;
            }
        }
    }
    if !replaced {
        body.push(req.row.clone());
    }

    let mut out = String::new();
    for line in std::iter::once(&header).chain(body.iter()) {
        out.push_str(line);
        out.push('\n');
    }
    if let Err(err) = std::fs::write(&req.path, &out) {
        return ToolResult::error(format!("Failed to write {}: {err}", req.path.display()));
    }

    let action = if replaced {
        "updated existing row"
    } else {
        "appended new row"
    };
    log::info!("emux.applyconfig: {action} for {} in {}", req.id, req.path.display());
    notes.insert(
        0,
        format!(
            "[emuxapplyconfig] {action} in {} for ID='{}'.",
            req.path.display(),
            req.id
        ),
    );

    let lines: Vec<&str> = out.lines().collect();
    let tail = &lines[lines.len().saturating_sub(TAIL_PREVIEW_LINES)..];
    ToolResult::ok(format!(
        "{}\n\nLast lines:\n{}",
        notes.join("\n"),
        tail.join("\n")
    ))
}

pub(super) async fn apply_config(config: &ServerConfig, args: &ToolArgs) -> Result<ToolResult> {
    let target = args.str("devices_target").unwrap_or("devices");
    if !DEVICE_TARGETS.contains(&target) {
        return Ok(ToolResult::error(format!(
            "devices_target must be one of: {}",
            DEVICE_TARGETS.join(", ")
        )));
    }

    let row = match (args.str("row"), args.object("fields")) {
        (Some(row), _) => row.to_string(),
        (None, Some(fields)) => match row_from_fields(fields) {
            Ok(row) => row,
            Err(err) => {
                return Ok(ToolResult::error(format!(
                    "Could not build CSV row from fields: {err}"
                )));
            }
        },
        (None, None) => {
            return Ok(ToolResult::error(
                "Provide either 'row' (CSV line) or 'fields' (object with all columns).",
            ));
        }
    };

    let cols = match parse_csv_line(&row) {
        Ok(cols) => cols,
        Err(err) => return Ok(ToolResult::error(format!("Invalid CSV row format: {err}"))),
    };
    if cols.len() != DEVICE_COLUMNS.len() {
        return Ok(ToolResult::error(format!(
            "CSV row must have {} columns, got {}",
            DEVICE_COLUMNS.len(),
            cols.len()
        )));
    }
    let id = cols[0].trim().to_string();
    if id.is_empty() {
        return Ok(ToolResult::error("First column (ID) cannot be empty."));
    }

    let req = DeviceUpsert {
        path: config
            .emux_home
            .join("files")
            .join("emux")
            .join("firmware")
            .join(target),
        id,
        row,
        allow_update: args.flag("allow_update", true),
        create_backup: args.flag("create_backup", true),
    };
    Ok(tokio::task::spawn_blocking(move || apply_upsert(&req)).await?)
}

/// Extra guidance when `sudo -n` refused to run.
fn sudo_hint(stderr: &str) -> &'static str {
    let lower = stderr.to_lowercase();
    if lower.contains("a terminal is required") || lower.contains("no tty present") {
        "\n[hint] sudo may require a TTY. Configure NOPASSWD or run without sudo (no_sudo=true) if permitted."
    } else if lower.contains("may not run sudo") || lower.contains("password") {
        "\n[hint] sudo denied or needs a password. Configure NOPASSWD or set no_sudo=true."
    } else {
        ""
    }
}

struct RebuildStep {
    program: &'static str,
    args: Vec<String>,
}

impl RebuildStep {
    fn new(script: &'static str, use_sudo: bool) -> Self {
        if use_sudo {
            Self {
                program: "sudo",
                args: vec!["-n".to_string(), script.to_string()],
            }
        } else {
            Self {
                program: script,
                args: Vec::new(),
            }
        }
    }

    fn report(&self, outcome: &Outcome, cwd: &Path, lines: &mut Vec<String>) {
        lines.push(format!("[cmd] {}", display_command(self.program, &self.args)));
        if !outcome.stdout.is_empty() {
            lines.push(outcome.stdout.clone());
        }
        if !outcome.stderr.is_empty() {
            lines.push(format!(
                "[stderr]\n{}{}",
                outcome.stderr,
                sudo_hint(&outcome.stderr)
            ));
        }
        lines.push(outcome.meta_line(cwd));
    }
}

pub(super) async fn rebuild(config: &ServerConfig, args: &ToolArgs) -> Result<ToolResult> {
    let home = &config.emux_home;
    if !home.is_dir() {
        return Ok(ToolResult::error(format!(
            "EMUX home not found: {}",
            home.display()
        )));
    }
    let timeout = args
        .positive_u64("timeout_sec")
        .map(Duration::from_secs)
        .unwrap_or(config.rebuild_timeout);
    let use_sudo = !args.flag("no_sudo", false);
    let runner = ProcessRunner::new(home);

    let volume = RebuildStep::new(VOLUME_SCRIPT, use_sudo);
    log::info!("emux.rebuild: {}", display_command(volume.program, &volume.args));
    let first = runner.run(volume.program, &volume.args, Some(timeout)).await;
    if first.exit_code != 0 {
        let mut lines = vec!["[emux.rebuild] build-emux-volume failed.".to_string()];
        volume.report(&first, home, &mut lines);
        return Ok(ToolResult::error(lines.join("\n")));
    }

    let docker = RebuildStep::new(DOCKER_SCRIPT, use_sudo);
    log::info!("emux.rebuild: {}", display_command(docker.program, &docker.args));
    let second = runner.run(docker.program, &docker.args, Some(timeout)).await;

    let mut lines = vec![
        "[emux.rebuild] Completed EMUX rebuild sequence.".to_string(),
        "\n--- build-emux-volume ---".to_string(),
    ];
    volume.report(&first, home, &mut lines);
    lines.push("\n--- build-emux-docker ---".to_string());
    docker.report(&second, home, &mut lines);

    let is_error = second.exit_code != 0;
    if is_error {
        lines.push("\nOne or more steps failed. Check stderr above.".to_string());
    }
    Ok(ToolResult::text(lines.join("\n"), is_error))
}
