use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub fn locate_firmae_mcp_bin() -> Result<PathBuf> {
    if let Some(path) = option_env!("CARGO_BIN_EXE_firmae-mcp") {
        return Ok(PathBuf::from(path));
    }

    // Try to resolve from the current test executable location.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(target_profile_dir) = exe.parent().and_then(|p| p.parent()) {
            let candidate = target_profile_dir.join("firmae-mcp");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    // Final fallback: search the repo target dirs.
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let repo_root = manifest_dir
        .ancestors()
        .nth(2)
        .context("failed to resolve repo root from CARGO_MANIFEST_DIR")?;
    for rel in ["target/debug/firmae-mcp", "target/release/firmae-mcp"] {
        let candidate = repo_root.join(rel);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    anyhow::bail!("failed to locate firmae-mcp binary; build with: cargo build -p firmae-mcp")
}

/// A FIRMAE_HOME with an executable `run.sh` and one firmware image.
#[allow(dead_code)]
pub fn fake_firmae_home(dir: &Path, run_script: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("run.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{run_script}\n"))?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;
    std::fs::write(dir.join("DIR-868L.bin"), b"\x27\x05\x19\x56")?;
    Ok(())
}
