use crate::Result;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_CONTENT: usize = 200_000;
pub const TRUNCATION_MARKER: &str = "\n\n[truncated]";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const EXCERPT_CHARS: i64 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSource {
    Heuristic,
    Summary,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewRun {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub iid_dir: Option<String>,
    pub exit_code: Option<i32>,
    pub result: Option<bool>,
    pub duration_sec: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub run_id: i64,
    pub source: AnalysisSource,
    pub summary: Option<String>,
    pub content: String,
    pub reasons: Option<serde_json::Value>,
}

/// An analysis row joined with the run it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub analysis_id: i64,
    pub run_id: i64,
    pub at_ts: String,
    pub source: String,
    pub summary: Option<String>,
    /// Leading text of the content, or the matched fragment for searches.
    pub excerpt: String,
    pub firmware: Option<String>,
    pub brand: Option<String>,
    pub exit_code: Option<i64>,
    pub result: Option<bool>,
}

impl AnalysisRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            analysis_id: row.get(0)?,
            run_id: row.get(1)?,
            at_ts: row.get(2)?,
            source: row.get(3)?,
            summary: row.get(4)?,
            excerpt: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            firmware: row.get(6)?,
            brand: row.get(7)?,
            exit_code: row.get(8)?,
            result: row.get::<_, Option<i64>>(9)?.map(|v| v != 0),
        })
    }
}

/// SQLite-backed record of runs and their analyses.
///
/// Every call opens its own connection; the store holds no handle between calls, so it can be
/// cloned freely into blocking tasks.
#[derive(Debug, Clone)]
pub struct RunStore {
    path: PathBuf,
    max_content: usize,
}

impl RunStore {
    pub fn new(path: impl Into<PathBuf>, max_content: usize) -> Self {
        Self {
            path: path.into(),
            max_content,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Create the schema if needed. Safe to call any number of times.
    pub fn init(&self) -> Result<()> {
        let conn = self.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("run store {} journal_mode={mode}", self.path.display());
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                brand TEXT,
                model TEXT,
                firmware TEXT,
                iid_dir TEXT,
                exit_code INTEGER,
                result_bool INTEGER,
                duration_sec REAL
            );

            CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                at_ts TEXT NOT NULL,
                source TEXT NOT NULL,
                summary TEXT,
                content TEXT,
                reasons_json TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_analyses_run ON analyses(run_id);

            CREATE VIRTUAL TABLE IF NOT EXISTS analyses_fts USING fts5(
                summary,
                content,
                content='analyses',
                content_rowid='id'
            );

            -- Rows are indexed explicitly on insert; removal has to follow the cascade.
            CREATE TRIGGER IF NOT EXISTS analyses_ad AFTER DELETE ON analyses BEGIN
                INSERT INTO analyses_fts(analyses_fts, rowid, summary, content)
                VALUES ('delete', old.id, COALESCE(old.summary, ''), COALESCE(old.content, ''));
            END;
            "#,
        )?;
        Ok(())
    }

    pub fn insert_run(&self, run: &NewRun) -> Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO runs (ts, brand, model, firmware, iid_dir, exit_code, result_bool, duration_sec)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                now_timestamp(),
                run.brand,
                run.model,
                run.firmware,
                run.iid_dir,
                run.exit_code,
                run.result.map(i64::from),
                run.duration_sec,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert one analysis for an existing run and index its text.
    ///
    /// Content longer than the configured bound (in characters) is cut at the bound and
    /// [`TRUNCATION_MARKER`] is appended.
    pub fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<i64> {
        let bounded = bound_content(&analysis.content, self.max_content);
        let reasons = analysis
            .reasons
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO analyses (run_id, at_ts, source, summary, content, reasons_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                analysis.run_id,
                now_timestamp(),
                analysis.source.as_str(),
                analysis.summary,
                bounded,
                reasons,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO analyses_fts (rowid, summary, content) VALUES (?1, ?2, ?3)",
            params![id, analysis.summary.as_deref().unwrap_or(""), bounded],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// Most recent analyses first.
    pub fn latest_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.run_id, a.at_ts, a.source, a.summary, substr(a.content, 1, ?2),
                    r.firmware, r.brand, r.exit_code, r.result_bool
             FROM analyses a
             JOIN runs r ON r.id = a.run_id
             ORDER BY a.id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64, EXCERPT_CHARS], AnalysisRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Full-text search over analysis summary and content, best matches first.
    ///
    /// The query is split into words and each word is matched as a quoted term, so FTS5 syntax
    /// in user input is never interpreted. A query with no words returns nothing.
    pub fn search_analyses(&self, query: &str, limit: usize) -> Result<Vec<AnalysisRecord>> {
        let Some(fts_query) = sanitize_fts_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.run_id, a.at_ts, a.source, a.summary,
                    snippet(analyses_fts, 1, '[', ']', '...', 24),
                    r.firmware, r.brand, r.exit_code, r.result_bool
             FROM analyses_fts
             JOIN analyses a ON a.id = analyses_fts.rowid
             JOIN runs r ON r.id = a.run_id
             WHERE analyses_fts MATCH ?1
             ORDER BY bm25(analyses_fts)
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fts_query, limit as i64], AnalysisRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

}

fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn bound_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &content[..cut]),
        None => content.to_string(),
    }
}

fn sanitize_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{word}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}
