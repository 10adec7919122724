use crate::config::ServerConfig;
use anyhow::Result;
use firmae_protocol::ToolResult;
use std::fs;
use std::path::Path;

fn clear_dir(dir: &Path) -> ToolResult {
    if !dir.exists() {
        return ToolResult::error(format!("Scratch folder not found: {}", dir.display()));
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            return ToolResult::error(format!("Failed to list {}: {err}", dir.display()));
        }
    };

    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(err) = result {
            return ToolResult::error(format!(
                "Error removing {}: {err}",
                entry.file_name().to_string_lossy()
            ));
        }
        removed += 1;
    }
    log::info!("cleared {removed} entries from {}", dir.display());
    ToolResult::ok(format!("Cleared {removed} items from {}.", dir.display()))
}

pub(super) async fn run(config: &ServerConfig) -> Result<ToolResult> {
    let scratch = config.scratch_dir();
    Ok(tokio::task::spawn_blocking(move || clear_dir(&scratch)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_files_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(scratch.join("1").join("image")).expect("mkdir");
        fs::write(scratch.join("1").join("emulation.log"), "x").expect("write");
        fs::write(scratch.join("stray.txt"), "x").expect("write");

        let result = clear_dir(&scratch);
        assert!(!result.is_error);
        assert_eq!(
            result.joined_text(),
            format!("Cleared 2 items from {}.", scratch.display())
        );
        assert_eq!(fs::read_dir(&scratch).expect("read").count(), 0);
    }

    #[test]
    fn missing_scratch_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = clear_dir(&dir.path().join("scratch"));
        assert!(result.is_error);
        assert!(result.joined_text().starts_with("Scratch folder not found: "));
    }
}
