use crate::config::ServerConfig;
use firmae_protocol::ToolResult;

const HELP_TEMPLATE: &str = include_str!("help.md");

pub(super) fn run(config: &ServerConfig) -> ToolResult {
    let home = config.firmae_home.display().to_string();
    ToolResult::ok(HELP_TEMPLATE.replace("{FIRMAE_HOME}", &home))
}
