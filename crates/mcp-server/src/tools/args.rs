use firmae_history::parse_loose_bool;
use serde_json::{Map, Value};

/// The `arguments` object of a `tools/call`, with forgiving accessors.
///
/// Callers send numbers as strings and booleans as words often enough that every accessor
/// accepts both.
#[derive(Debug, Clone, Default)]
pub(crate) struct ToolArgs {
    map: Map<String, Value>,
}

impl ToolArgs {
    pub(crate) fn new(value: Value) -> Self {
        match value {
            Value::Object(map) => Self { map },
            _ => Self::default(),
        }
    }

    /// Trimmed string value; empty strings count as absent.
    pub(crate) fn str(&self, key: &str) -> Option<&str> {
        self.map
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub(crate) fn flag(&self, key: &str, default: bool) -> bool {
        match self.map.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => parse_loose_bool(s).unwrap_or(default),
            _ => default,
        }
    }

    /// A positive integer, given as a JSON number or a numeric string.
    pub(crate) fn positive_u64(&self, key: &str) -> Option<u64> {
        let n = match self.map.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 1.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }?;
        (n > 0).then_some(n)
    }

    pub(crate) fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.map.get(key).and_then(Value::as_object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_are_forgiving() {
        let args = ToolArgs::new(json!({
            "brand": "  DLINK ",
            "empty": "   ",
            "timeout": "90",
            "last_n": 5,
            "zero": 0,
            "no_sudo": "yes",
            "success_only": 1,
            "fields": {"ID": "x"},
        }));
        assert_eq!(args.str("brand"), Some("DLINK"));
        assert_eq!(args.str("empty"), None);
        assert_eq!(args.positive_u64("timeout"), Some(90));
        assert_eq!(args.positive_u64("last_n"), Some(5));
        assert_eq!(args.positive_u64("zero"), None);
        assert!(args.flag("no_sudo", false));
        assert!(args.flag("success_only", false));
        assert!(args.flag("missing", true));
        assert!(args.object("fields").is_some());
    }

    #[test]
    fn non_object_arguments_are_empty() {
        let args = ToolArgs::new(json!(["not", "an", "object"]));
        assert_eq!(args.str("brand"), None);
    }
}
