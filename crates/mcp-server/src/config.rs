use firmae_history::{Ledger, RunStore, DEFAULT_MAX_CONTENT};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_EMULATE_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_REBUILD_TIMEOUT: Duration = Duration::from_secs(7200);

const LEDGER_FILE: &str = "emulation_records.csv";
const KB_DB_FILE: &str = "firmae_kb.sqlite";

/// Paths and limits shared by every tool call. Built once at startup and passed explicitly.
#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) firmae_home: PathBuf,
    pub(crate) emux_home: PathBuf,
    pub(crate) kb_db: PathBuf,
    pub(crate) kb_max_content: usize,
    pub(crate) lookup_kb: PathBuf,
    pub(crate) emulate_timeout: Duration,
    pub(crate) rebuild_timeout: Duration,
    pub(crate) trust_result_file: bool,
}

impl ServerConfig {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let firmae_home = var("FIRMAE_HOME")
            .map(|raw| expand_home(&raw))
            .unwrap_or_else(|| home_or_root().join("FirmAE"));
        let emux_home = var("EMUX_HOME")
            .map(|raw| expand_home(&raw))
            .unwrap_or_else(|| home_or_root().join("emux"));
        let kb_db = var("FIRMAE_KB_DB")
            .map(|raw| expand_home(&raw))
            .unwrap_or_else(|| firmae_home.join(KB_DB_FILE));
        let lookup_kb = var("FIRMAE_LOOKUP_KB")
            .map(|raw| expand_home(&raw))
            .unwrap_or_else(|| firmae_home.join("kb").join("tplink-kb"));

        Self {
            kb_max_content: parse_positive("FIRMAE_KB_MAX_CONTENT", var("FIRMAE_KB_MAX_CONTENT"))
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_MAX_CONTENT),
            emulate_timeout: parse_positive(
                "FIRMAE_EMULATE_TIMEOUT_SEC",
                var("FIRMAE_EMULATE_TIMEOUT_SEC"),
            )
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EMULATE_TIMEOUT),
            rebuild_timeout: parse_positive(
                "FIRMAE_REBUILD_TIMEOUT_SEC",
                var("FIRMAE_REBUILD_TIMEOUT_SEC"),
            )
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REBUILD_TIMEOUT),
            trust_result_file: var("FIRMAE_TRUST_RESULT_FILE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            firmae_home,
            emux_home,
            kb_db,
            lookup_kb,
        }
    }

    /// Defaults rooted at `home`, with EMUX under `home/emux`.
    #[cfg(test)]
    pub(crate) fn for_home(home: &Path) -> Self {
        Self {
            firmae_home: home.to_path_buf(),
            emux_home: home.join("emux"),
            kb_db: home.join(KB_DB_FILE),
            kb_max_content: DEFAULT_MAX_CONTENT,
            lookup_kb: home.join("kb").join("tplink-kb"),
            emulate_timeout: DEFAULT_EMULATE_TIMEOUT,
            rebuild_timeout: DEFAULT_REBUILD_TIMEOUT,
            trust_result_file: false,
        }
    }

    pub(crate) fn scratch_dir(&self) -> PathBuf {
        self.firmae_home.join("scratch")
    }

    pub(crate) fn ledger(&self) -> Ledger {
        Ledger::new(self.firmae_home.join(LEDGER_FILE))
    }

    pub(crate) fn run_store(&self) -> RunStore {
        RunStore::new(&self.kb_db, self.kb_max_content)
    }
}

fn parse_positive(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            log::warn!("ignoring {key}={raw:?}: expected a positive integer");
            None
        }
    }
}

fn home_or_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        return home_or_root();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home_or_root().join(rest);
    }
    PathBuf::from(raw)
}

/// `~` expansion, then relative paths are taken against `base`.
pub(crate) fn resolve_against(base: &Path, raw: &str) -> PathBuf {
    let expanded = expand_home(raw);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn derived_paths_follow_firmae_home() {
        let config = ServerConfig::from_lookup(lookup(&[("FIRMAE_HOME", "/opt/FirmAE")]));
        assert_eq!(config.firmae_home, PathBuf::from("/opt/FirmAE"));
        assert_eq!(config.kb_db, PathBuf::from("/opt/FirmAE/firmae_kb.sqlite"));
        assert_eq!(config.lookup_kb, PathBuf::from("/opt/FirmAE/kb/tplink-kb"));
        assert_eq!(config.scratch_dir(), PathBuf::from("/opt/FirmAE/scratch"));
        assert_eq!(
            config.ledger().path(),
            Path::new("/opt/FirmAE/emulation_records.csv")
        );
        assert_eq!(config.emulate_timeout, DEFAULT_EMULATE_TIMEOUT);
        assert!(!config.trust_result_file);
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("FIRMAE_HOME", "/fw"),
            ("FIRMAE_KB_DB", "/var/kb.sqlite"),
            ("FIRMAE_KB_MAX_CONTENT", "5000"),
            ("FIRMAE_EMULATE_TIMEOUT_SEC", "soon"),
            ("FIRMAE_REBUILD_TIMEOUT_SEC", "60"),
            ("FIRMAE_TRUST_RESULT_FILE", "On"),
        ]));
        assert_eq!(config.kb_db, PathBuf::from("/var/kb.sqlite"));
        assert_eq!(config.kb_max_content, 5000);
        assert_eq!(config.emulate_timeout, DEFAULT_EMULATE_TIMEOUT);
        assert_eq!(config.rebuild_timeout, Duration::from_secs(60));
        assert!(config.trust_result_file);
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/opt/FirmAE");
        assert_eq!(
            resolve_against(base, "firmwares/fw.bin"),
            PathBuf::from("/opt/FirmAE/firmwares/fw.bin")
        );
        assert_eq!(resolve_against(base, "/tmp/fw.bin"), PathBuf::from("/tmp/fw.bin"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_against(base, "~/fw.bin"), home.join("fw.bin"));
        }
    }
}
