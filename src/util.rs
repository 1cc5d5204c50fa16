//! Shared utility functions.

use serde_json::Value;

/// Every JSON object embedded in text that may contain other content.
///
/// Each `{` is tried as the start of a JSON value. A parsed object is kept and
/// scanning resumes after it; anything else (code braces, unbalanced prose)
/// moves on to the next `{`. Objects are returned in order of appearance.
pub fn extract_json_objects(text: &str) -> Vec<Value> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => {
                found.push(value);
                from = start + stream.byte_offset();
            }
            _ => from = start + 1,
        }
    }
    found
}

/// First `max_chars` characters of `text`, trimmed, with an ellipsis when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Last `max_chars` characters of `text`, with a leading ellipsis when cut.
pub fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().skip(count - max_chars).collect();
    format!("...{}", cut.trim_start())
}

/// Make `id` safe to use as a single path component.
pub fn sanitize_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_objects_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(extract_json_objects(text), vec![json!({"key": "value"})]);
    }

    #[test]
    fn test_extract_json_objects_with_prose_around() {
        let text = r#"Here is the JSON: {"key": "value"} and some more text"#;
        assert_eq!(extract_json_objects(text), vec![json!({"key": "value"})]);
    }

    #[test]
    fn test_extract_json_objects_nested_is_one_object() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(
            extract_json_objects(text),
            vec![json!({"outer": {"inner": "value"}})]
        );
    }

    #[test]
    fn test_extract_json_objects_ignores_braces_in_strings() {
        let text = r#"result: {"gap": "missing } brace", "code": "fn x() { \"}\" }"} trailing"#;
        assert_eq!(
            extract_json_objects(text),
            vec![json!({"gap": "missing } brace", "code": "fn x() { \"}\" }"})]
        );
    }

    #[test]
    fn test_extract_json_objects_skips_code_braces() {
        let text = r#"I reviewed `fn run() { spawn() }` and {braces. Verdict: {"ok": true} then {"n": 1}"#;
        assert_eq!(
            extract_json_objects(text),
            vec![json!({"ok": true}), json!({"n": 1})]
        );
    }

    #[test]
    fn test_extract_json_objects_no_json() {
        assert!(extract_json_objects("No JSON here").is_empty());
        assert!(extract_json_objects(r#"{"key": "value""#).is_empty());
    }

    #[test]
    fn test_excerpt_and_tail() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
        assert_eq!(tail("abcdefghij", 3), "...hij");
        assert_eq!(tail("abc", 3), "abc");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("auth/login flow"), "auth-login-flow");
        assert_eq!(sanitize_component(".."), "unnamed");
        assert_eq!(sanitize_component("spec_01.v2"), "spec_01.v2");
    }
}
