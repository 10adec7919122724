use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn ansi_escape() -> &'static Regex {
    static ANSI_ESCAPE: OnceLock<Regex> = OnceLock::new();
    ANSI_ESCAPE.get_or_init(|| {
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static ANSI pattern")
    })
}

/// Remove ANSI escape sequences (colors, cursor moves) from captured output.
#[must_use]
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ansi_escape().replace_all(text, "")
}

pub(crate) fn decode_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    strip_ansi(&text).into_owned()
}

fn needs_quoting(arg: &str) -> bool {
    arg.is_empty()
        || arg.chars().any(|c| {
            !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '+' | ','))
        })
}

/// Render a command line for humans, quoting arguments the way a POSIX shell would need them.
#[must_use]
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    for raw in std::iter::once(program).chain(args.iter().map(String::as_str)) {
        if needs_quoting(raw) {
            parts.push(format!("'{}'", raw.replace('\'', r"'\''")));
        } else {
            parts.push(raw.to_string());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_and_cursor_sequences() {
        assert_eq!(strip_ansi("\x1b[1;31mred\x1b[0m plain"), "red plain");
        assert_eq!(strip_ansi("a\x1b[2Kb"), "ab");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
    }

    #[test]
    fn decodes_invalid_utf8_leniently() {
        let text = decode_output(b"ok \xff\x1b[32mgreen\x1b[0m");
        assert_eq!(text, "ok \u{FFFD}green");
    }

    #[test]
    fn quotes_only_when_needed() {
        let args = vec!["-c".to_string(), "DLINK".to_string(), "my fw.bin".to_string()];
        assert_eq!(display_command("./run.sh", &args), "./run.sh -c DLINK 'my fw.bin'");
        assert_eq!(display_command("sudo", &["it's".to_string()]), r"sudo 'it'\''s'");
    }
}
