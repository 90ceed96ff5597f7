//! Stdout rendering: pretty JSON for machines, plain lines for people.

use std::io::Write;

use serde::Serialize;
use serde_json::{json, Value};

/// Print `value` as pretty JSON, or fall back to a compact error line.
pub fn print_json<T: Serialize>(value: &T) {
    let mut stdout = std::io::stdout();
    let _ = match serde_json::to_string_pretty(value) {
        Ok(text) => writeln!(stdout, "{text}"),
        Err(e) => writeln!(stdout, "{{\"success\":false,\"error\":\"serialize: {e}\"}}"),
    };
}

/// Print plain text lines.
pub fn print_lines<I, S>(lines: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut stdout = std::io::stdout();
    for line in lines {
        let _ = writeln!(stdout, "{}", line.as_ref());
    }
}

/// Wrap a successful payload.
pub fn success_envelope<T: Serialize>(data: &T) -> Value {
    json!({ "success": true, "data": data })
}

pub fn error_envelope(code: &str, message: &str) -> Value {
    json!({ "success": false, "error": { "code": code, "message": message } })
}

/// Emit `data` as JSON, or `human()` as text.
pub fn emit<T, F>(json_mode: bool, data: &T, human: F)
where
    T: Serialize,
    F: FnOnce() -> Vec<String>,
{
    if json_mode {
        print_json(&success_envelope(data));
    } else {
        print_lines(human());
    }
}

/// Render an optional field for text output.
pub fn or_dash<T: ToString>(value: Option<&T>) -> String {
    value.map_or_else(|| "-".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let v = success_envelope(&json!({"id": 3}));
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["id"], 3);
    }

    #[test]
    fn test_error_envelope_shape() {
        let v = error_envelope("NOT_FOUND", "job 9 not found");
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "NOT_FOUND");
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash::<i64>(None), "-");
        assert_eq!(or_dash(Some(&7)), "7");
    }
}
