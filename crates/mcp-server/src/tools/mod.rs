//! Tool handlers behind `tools/call`.
//!
//! Each handler returns `anyhow::Result<ToolResult>`: argument problems and expected failures
//! are ordinary results with `isError=true`, while `Err` (and panics) are turned into an
//! `Internal error: ...` result at [`call_tool`], so nothing escapes into the read loop.

mod analyses;
mod args;
pub(crate) mod catalog;
mod clean;
mod emulate;
mod emux;
mod help;
mod history;
mod lookup;

use crate::config::ServerConfig;
use anyhow::Result;
use args::ToolArgs;
use firmae_protocol::ToolResult;
use serde_json::Value;
use std::sync::Arc;

pub(crate) use catalog::is_long_running;

async fn run_tool(config: &ServerConfig, name: &str, args: ToolArgs) -> Result<ToolResult> {
    match name {
        "firmae.help" => Ok(help::run(config)),
        "firmae.emulate" => emulate::run(config, &args).await,
        "firmae.clean" => clean::run(config).await,
        "firmae.history" => history::run(config, &args).await,
        "firmae.lookupKB" => lookup::run(config).await,
        "firmae.analyses" => analyses::run(config, &args).await,
        "emux.applyconfig" => emux::apply_config(config, &args).await,
        "emux.rebuild" => emux::rebuild(config, &args).await,
        other => Ok(ToolResult::error(format!("Unknown tool: {other}"))),
    }
}

/// Run one tool to completion and always produce a result.
pub(crate) async fn call_tool(config: Arc<ServerConfig>, name: &str, arguments: Value) -> ToolResult {
    let tool = name.to_string();
    let args = ToolArgs::new(arguments);
    let handle = tokio::spawn(async move { run_tool(&config, &tool, args).await });
    match handle.await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            log::warn!("tool {name} failed: {err:#}");
            ToolResult::error(format!("Internal error: {err:#}"))
        }
        Err(err) => {
            log::error!("tool {name} aborted: {err}");
            ToolResult::error(format!("Internal error: {err}"))
        }
    }
}
