use crate::config::ServerConfig;
use anyhow::Result;
use firmae_protocol::ToolResult;
use std::path::Path;

fn render(kb_path: &Path) -> ToolResult {
    if !kb_path.exists() {
        return ToolResult::error(format!(
            "Knowledge base file not found: {}",
            kb_path.display()
        ));
    }
    let text = match std::fs::read(kb_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            return ToolResult::error(format!("Error reading {}: {err}", kb_path.display()));
        }
    };
    let models: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if models.is_empty() {
        return ToolResult::ok("No models found in the knowledge base.");
    }

    let listing = models
        .iter()
        .enumerate()
        .map(|(i, model)| format!("{}. {model}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    ToolResult::ok(format!(
        "**Knowledge Base: Available Models**\n\n{listing}\n\n\
         Emulate one with:\n\
         `firmae.emulate` brand: TPLINK, firmware_file: <image for the model>\n"
    ))
}

pub(super) async fn run(config: &ServerConfig) -> Result<ToolResult> {
    let kb_path = config.lookup_kb.clone();
    Ok(tokio::task::spawn_blocking(move || render(&kb_path)).await?)
}
