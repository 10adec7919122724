use super::args::ToolArgs;
use crate::config::ServerConfig;
use anyhow::Result;
use firmae_history::HistoryRecord;
use firmae_protocol::ToolResult;

const DEFAULT_LAST_N: u64 = 20;

#[derive(Debug, Default)]
struct HistoryFilter {
    brand: Option<String>,
    model: Option<String>,
    success_only: bool,
    last_n: usize,
}

impl HistoryFilter {
    fn from_args(args: &ToolArgs) -> Self {
        Self {
            brand: args.str("brand").map(str::to_string),
            model: args.str("model").map(str::to_string),
            success_only: args.flag("success_only", false),
            last_n: args.positive_u64("last_n").unwrap_or(DEFAULT_LAST_N) as usize,
        }
    }

    fn matches(&self, record: &HistoryRecord) -> bool {
        if let Some(brand) = &self.brand {
            if normalize(brand) != normalize(&record.brand) {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if !normalize(&record.firmware_name).contains(&normalize(model)) {
                return false;
            }
        }
        !self.success_only || record.result
    }

    fn describe(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if let Some(brand) = &self.brand {
            hints.push(format!("brand={brand}"));
        }
        if let Some(model) = &self.model {
            hints.push(format!("model~{model}"));
        }
        if self.success_only {
            hints.push("success_only=true".to_string());
        }
        hints
    }
}

/// Lowercase and drop everything but ASCII letters and digits.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn tick(flag: bool) -> &'static str {
    if flag {
        "✓"
    } else {
        "✗"
    }
}

fn render(mut records: Vec<HistoryRecord>, filter: &HistoryFilter) -> String {
    records.sort_by(|a, b| b.number.cmp(&a.number));
    let selected: Vec<&HistoryRecord> = records
        .iter()
        .filter(|record| filter.matches(record))
        .take(filter.last_n)
        .collect();

    if selected.is_empty() {
        let mut msg = "No matching emulation records.".to_string();
        let hints = filter.describe();
        if !hints.is_empty() {
            msg.push_str(&format!(" Filters: {}", hints.join(", ")));
        }
        return msg;
    }

    let mut lines = vec!["**Emulation History (most recent first)**".to_string()];
    for record in selected {
        lines.push(format!(
            "- #{} | {} | {} | arch={} | ping={} web={} result={}",
            record.number,
            record.brand,
            record.firmware_name,
            record.architecture,
            tick(record.ping),
            tick(record.web),
            tick(record.result),
        ));
    }
    lines.push(
        "\nFilters: brand=<DLINK|TPLINK> model=<substring> success_only=<true|false> last_n=<N>\n\
         Example: brand=DLINK model=DIR-868L success_only=true last_n=10"
            .to_string(),
    );
    lines.join("\n")
}

pub(super) async fn run(config: &ServerConfig, args: &ToolArgs) -> Result<ToolResult> {
    let ledger = config.ledger();
    if !ledger.path().exists() {
        return Ok(ToolResult::ok(format!(
            "No records yet. CSV not found at {}",
            ledger.path().display()
        )));
    }
    let records = match ledger.read_records().await {
        Ok(records) => records,
        Err(err) => {
            return Ok(ToolResult::error(format!(
                "Failed to read emulation_records.csv: {err}"
            )));
        }
    };
    Ok(ToolResult::ok(render(records, &HistoryFilter::from_args(args))))
}
