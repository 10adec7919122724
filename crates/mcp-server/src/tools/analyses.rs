use super::args::ToolArgs;
use crate::config::ServerConfig;
use anyhow::Result;
use firmae_history::{AnalysisRecord, HistoryError, RunStore};
use firmae_protocol::ToolResult;

const DEFAULT_LIMIT: u64 = 10;
const MAX_LIMIT: u64 = 100;

fn lookup(
    store: &RunStore,
    query: Option<&str>,
    limit: usize,
) -> Result<Vec<AnalysisRecord>, HistoryError> {
    store.init()?;
    match query {
        Some(query) => store.search_analyses(query, limit),
        None => store.latest_analyses(limit),
    }
}

fn render(records: &[AnalysisRecord], query: Option<&str>) -> String {
    if records.is_empty() {
        return match query {
            Some(query) => format!("No stored analyses match \"{query}\"."),
            None => "No analyses stored yet. Run firmae.emulate first.".to_string(),
        };
    }

    let title = match query {
        Some(query) => format!("**Stored analyses matching \"{query}\"**"),
        None => "**Latest stored analyses**".to_string(),
    };
    let mut lines = vec![title];
    for record in records {
        let outcome = match record.result {
            Some(true) => "ok",
            Some(false) => "failed",
            None => "unknown",
        };
        lines.push(format!(
            "\n- analysis #{} (run #{}) | {} | {} | {} | exit={} | {outcome}",
            record.analysis_id,
            record.run_id,
            record.at_ts,
            record.brand.as_deref().unwrap_or("-"),
            record.firmware.as_deref().unwrap_or("-"),
            record
                .exit_code
                .map_or_else(|| "-".to_string(), |code| code.to_string()),
        ));
        if let Some(summary) = record.summary.as_deref() {
            lines.push(format!("  [{}] {summary}", record.source));
        }
        let excerpt = record.excerpt.trim();
        if !excerpt.is_empty() {
            for line in excerpt.lines() {
                lines.push(format!("  > {line}"));
            }
        }
    }
    lines.join("\n")
}

pub(super) async fn run(config: &ServerConfig, args: &ToolArgs) -> Result<ToolResult> {
    let query = args.str("query").map(str::to_string);
    let limit = args
        .positive_u64("limit")
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT) as usize;

    let store = config.run_store();
    let lookup_query = query.clone();
    let found =
        tokio::task::spawn_blocking(move || lookup(&store, lookup_query.as_deref(), limit)).await?;
    match found {
        Ok(records) => Ok(ToolResult::ok(render(&records, query.as_deref()))),
        Err(err) => Ok(ToolResult::error(format!(
            "Failed to read the knowledge base: {err}"
        ))),
    }
}
