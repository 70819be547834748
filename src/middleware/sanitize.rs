//! Payload sanitizer, applied to body and query values before validation.
//!
//! String leaves lose angle brackets and any `javascript:` / `data:` scheme
//! prefix; object keys containing path-separator-like characters
//! (`. # $ [ ]`) are rewritten to underscores, recursively.

use serde_json::{Map, Value};

const KEY_REWRITE: &[char] = &['.', '#', '$', '[', ']'];

pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => {
            let mut clean = Map::with_capacity(map.len());
            for (key, value) in map {
                clean.insert(sanitize_key(&key), sanitize_value(value));
            }
            Value::Object(clean)
        }
        other => other,
    }
}

pub fn sanitize_string(input: &str) -> String {
    let mut out: String = input.chars().filter(|c| *c != '<' && *c != '>').collect();

    // Strip scheme prefixes repeatedly in case of nesting like
    // "javascript:javascript:alert(1)"
    loop {
        let trimmed = out.trim_start();
        let lower = trimmed.to_lowercase();
        let stripped = if lower.starts_with("javascript:") {
            &trimmed["javascript:".len()..]
        } else if lower.starts_with("data:") {
            &trimmed["data:".len()..]
        } else {
            break;
        };
        out = stripped.to_string();
    }

    out
}

pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if KEY_REWRITE.contains(&c) { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_tags_lose_their_brackets() {
        let out = sanitize_string("<script>alert(1)</script>");
        assert!(!out.contains("<script>"));
        assert!(!out.contains('<'));
        assert_eq!(out, "scriptalert(1)/script");
    }

    #[test]
    fn scheme_prefixes_are_stripped() {
        assert_eq!(sanitize_string("javascript:alert(1)"), "alert(1)");
        assert_eq!(sanitize_string("  JavaScript:alert(1)"), "alert(1)");
        assert_eq!(sanitize_string("data:text/html,x"), "text/html,x");
        assert_eq!(sanitize_string("javascript:javascript:alert(1)"), "alert(1)");
        // mid-string occurrences are untouched
        assert_eq!(sanitize_string("see javascript: docs"), "see javascript: docs");
    }

    #[test]
    fn keys_with_path_separators_are_rewritten() {
        let value = json!({
            "a.b": 1,
            "c#d": { "e$f": "x", "g[0]": 2 },
        });
        let clean = sanitize_value(value);
        assert_eq!(clean["a_b"], json!(1));
        assert_eq!(clean["c_d"]["e_f"], json!("x"));
        assert_eq!(clean["c_d"]["g_0_"], json!(2));
    }

    #[test]
    fn non_string_leaves_are_untouched() {
        let value = json!({ "n": 5, "b": true, "arr": [1, "<x>"] });
        let clean = sanitize_value(value);
        assert_eq!(clean["n"], json!(5));
        assert_eq!(clean["b"], json!(true));
        assert_eq!(clean["arr"][1], json!("x"));
    }
}
