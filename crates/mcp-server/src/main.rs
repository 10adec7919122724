//! FirmAE MCP adapter
//!
//! Line-delimited JSON-RPC over stdio that lets an agent drive FirmAE firmware emulation and the
//! EMUX environment.
//!
//! ## Tools
//!
//! - `firmae.help` - Usage notes and examples
//! - `firmae.emulate` - Run `run.sh -c <brand> <firmware>`, record the outcome, analyse failures
//! - `firmae.clean` - Clear `FIRMAE_HOME/scratch/`
//! - `firmae.history` - Past runs from `emulation_records.csv`
//! - `firmae.lookupKB` - Known router models
//! - `firmae.analyses` - Search stored failure analyses and summaries
//! - `emux.applyconfig` - Upsert a device row in the EMUX devices file
//! - `emux.rebuild` - Rebuild the EMUX volume and docker image
//!
//! ## Usage
//!
//! Add to your MCP client configuration:
//! ```json
//! {
//!   "mcpServers": {
//!     "firmae": {
//!       "command": "firmae-mcp",
//!       "env": { "FIRMAE_HOME": "/opt/FirmAE" }
//!     }
//!   }
//! }
//! ```

use anyhow::Result;
use std::sync::Arc;

mod config;
mod dispatcher;
mod tools;
mod transport;

use config::ServerConfig;

fn verbose_logging() -> bool {
    std::env::var("FIRMAE_MCP_LOG")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr only; stdout carries the protocol.
    let default_level = if verbose_logging() { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    let config = ServerConfig::from_env();
    log::info!(
        "Starting FirmAE MCP adapter (FIRMAE_HOME={}, EMUX_HOME={})",
        config.firmae_home.display(),
        config.emux_home.display()
    );

    dispatcher::serve(tokio::io::stdin(), tokio::io::stdout(), Arc::new(config)).await?;

    log::info!("FirmAE MCP adapter stopped");
    Ok(())
}
