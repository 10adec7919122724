use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Log files an attempt may leave behind, in concatenation order.
pub const LOG_NAMES: [&str; 4] = [
    "makeImage.log",
    "makeNetwork.log",
    "qemu.final.serial.log",
    "emulation.log",
];

const NETWORK_LOG: &str = "makeNetwork.log";

pub mod labels {
    pub const FILESYSTEM_IMAGE: &str = "Filesystem image build error";
    pub const ARCHITECTURE: &str = "Architecture / binfmt issue";
    pub const BOOT: &str = "QEMU boot/kernel failure";
    pub const NETWORK_BRIDGE: &str = "Network bridging/tap error";
    pub const PERMISSION: &str = "Permission / capability problem";
    pub const TIMEOUT: &str = "Timeout / watchdog";
    pub const WEB_SERVICE: &str = "Web service did not come up";
    pub const REACHABLE_WITHOUT_WEB: &str = "Network reachable but web service not detected";
}

struct Rule {
    label: &'static str,
    pattern: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        label: labels::FILESYSTEM_IMAGE,
        pattern: r"(mke2fs|e2fsck).*(error|aborted|unable|fail)|No such file or directory.*(root|image)|mount:.*failed",
    },
    Rule {
        label: labels::ARCHITECTURE,
        pattern: r"(Unknown architecture|binfmt_misc|Exec format error|qemu-.*: Could not open|get architecture.*fail)",
    },
    Rule {
        label: labels::BOOT,
        pattern: r"(Kernel panic|Unable to mount root|Segmentation fault|qemu: .*error|end Kernel panic)",
    },
    Rule {
        label: labels::NETWORK_BRIDGE,
        pattern: r"(tap|bridge|br_add_if|br_dev_ioctl|SIOCSIF).* (fail|error|denied)|Network unreachable",
    },
    Rule {
        label: labels::PERMISSION,
        pattern: r"(Permission denied|Operation not permitted|cap_net_admin)",
    },
    Rule {
        label: labels::TIMEOUT,
        pattern: r"\b(timeout|timed out)\b",
    },
    Rule {
        label: labels::WEB_SERVICE,
        pattern: r"(Web service on .* (down|failed)|httpd.*fail|lighttpd.*fail|nginx.*fail)",
    },
];

struct Compiled {
    rules: Vec<(&'static str, Regex)>,
    reachable: Regex,
    web_reported: Regex,
}

fn compiled() -> &'static Compiled {
    static COMPILED: OnceLock<Compiled> = OnceLock::new();
    COMPILED.get_or_init(|| Compiled {
        rules: RULES
            .iter()
            .map(|rule| {
                let re = RegexBuilder::new(rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("static failure pattern");
                (rule.label, re)
            })
            .collect(),
        reachable: Regex::new(r"Network reachable on \d+\.\d+\.\d+\.\d+")
            .expect("static reachability pattern"),
        web_reported: Regex::new(r"Web service on .*").expect("static web pattern"),
    })
}

/// Tail text per known log; absent logs are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBundle {
    tails: [String; LOG_NAMES.len()],
}

impl LogBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` (and stores nothing) for a name outside [`LOG_NAMES`].
    pub fn set(&mut self, name: &str, text: impl Into<String>) -> bool {
        match LOG_NAMES.iter().position(|known| *known == name) {
            Some(idx) => {
                self.tails[idx] = text.into();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn with(mut self, name: &str, text: impl Into<String>) -> Self {
        self.set(name, text);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> &str {
        LOG_NAMES
            .iter()
            .position(|known| *known == name)
            .map_or("", |idx| self.tails[idx].as_str())
    }

    /// `true` when no log produced any text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tails.iter().all(String::is_empty)
    }

    /// `(name, tail)` pairs in [`LOG_NAMES`] order, skipping empty tails.
    pub fn present(&self) -> impl Iterator<Item = (&'static str, &str)> {
        LOG_NAMES
            .iter()
            .zip(self.tails.iter())
            .filter(|(_, text)| !text.is_empty())
            .map(|(name, text)| (*name, text.as_str()))
    }

    fn combined(&self) -> String {
        self.present()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Sorted, duplicate-free failure categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureReport {
    labels: Vec<&'static str>,
}

impl FailureReport {
    #[must_use]
    pub fn labels(&self) -> &[&'static str] {
        &self.labels
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| *l == label)
    }
}

/// Classify one attempt's logs.
///
/// An empty bundle yields an empty report. Telling "nothing matched" apart from "no logs were
/// written" is the caller's job (see [`LogBundle::is_empty`]).
#[must_use]
pub fn classify(bundle: &LogBundle) -> FailureReport {
    let compiled = compiled();
    let combined = bundle.combined();
    let mut found = BTreeSet::new();

    if !combined.is_empty() {
        for (label, re) in &compiled.rules {
            if re.is_match(&combined) {
                found.insert(*label);
            }
        }
    }

    let network = bundle.get(NETWORK_LOG);
    if !network.is_empty()
        && compiled.reachable.is_match(network)
        && !compiled.web_reported.is_match(&combined)
    {
        found.insert(labels::REACHABLE_WITHOUT_WEB);
    }

    FailureReport {
        labels: found.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_bundle_yields_empty_report() {
        assert!(classify(&LogBundle::new()).is_empty());
        let blank = LogBundle::new().with("emulation.log", "");
        assert!(classify(&blank).is_empty());
    }

    #[test]
    fn kernel_panic_is_a_boot_failure_only() {
        let bundle = LogBundle::new().with("qemu.final.serial.log", "Kernel panic - not syncing");
        assert_eq!(classify(&bundle).labels(), &[labels::BOOT]);
    }

    #[test]
    fn reachable_network_without_web_service() {
        let bundle = LogBundle::new().with("makeNetwork.log", "Network reachable on 10.0.0.1");
        let report = classify(&bundle);
        assert!(report.contains(labels::REACHABLE_WITHOUT_WEB));
    }

    #[test]
    fn web_service_line_anywhere_suppresses_reachability_hint() {
        let bundle = LogBundle::new()
            .with("makeNetwork.log", "Network reachable on 192.168.0.1")
            .with("emulation.log", "Web service on 192.168.0.1 up");
        assert!(!classify(&bundle).contains(labels::REACHABLE_WITHOUT_WEB));
    }

    #[test]
    fn reachability_hint_only_reads_the_network_log() {
        let bundle = LogBundle::new().with("emulation.log", "Network reachable on 10.0.0.1");
        assert!(!classify(&bundle).contains(labels::REACHABLE_WITHOUT_WEB));
    }

    #[test]
    fn matching_is_case_insensitive_and_sorted() {
        let bundle = LogBundle::new()
            .with("makeImage.log", "MKE2FS: something FAILED badly")
            .with("emulation.log", "httpd start fail\nPERMISSION DENIED on /dev/net/tun\nwatchdog timeout");
        assert_eq!(
            classify(&bundle).labels(),
            &[
                labels::FILESYSTEM_IMAGE,
                labels::PERMISSION,
                labels::TIMEOUT,
                labels::WEB_SERVICE,
            ]
        );
    }

    #[test]
    fn timeout_needs_word_boundaries() {
        let bundle = LogBundle::new().with("emulation.log", "set_timeouts=3");
        assert!(classify(&bundle).is_empty());
    }

    #[test]
    fn classification_is_deterministic() {
        let bundle = LogBundle::new()
            .with("makeNetwork.log", "br_add_if: tap0 failed\nNetwork reachable on 10.0.0.2")
            .with("qemu.final.serial.log", "Unable to mount root fs\nExec format error");
        let first = classify(&bundle);
        for _ in 0..5 {
            assert_eq!(classify(&bundle), first);
        }
        let mut sorted = first.labels().to_vec();
        sorted.sort_unstable();
        assert_eq!(first.labels(), sorted.as_slice());
    }

    #[test]
    fn unknown_log_names_are_rejected() {
        let mut bundle = LogBundle::new();
        assert!(!bundle.set("random.log", "Kernel panic"));
        assert!(bundle.is_empty());
    }
}
