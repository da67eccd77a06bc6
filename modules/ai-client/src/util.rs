use std::sync::LazyLock;

use regex::Regex;

use crate::error::AiError;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid regex")
});

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Locate a JSON object inside free-form model output.
///
/// A fenced code block wins. Otherwise the first balanced `{...}` span is
/// returned, with braces inside string literals ignored.
pub fn extract_json_payload(response: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(response) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }
    first_balanced_object(response)
}

/// Extract and parse the JSON object in a model response. Fails closed.
pub fn parse_json_payload(response: &str) -> Result<serde_json::Value, AiError> {
    let payload = extract_json_payload(response)
        .ok_or_else(|| AiError::Parse("no JSON object in response".to_string()))?;

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(AiError::Parse("JSON payload is not an object".to_string())),
        Err(fenced_err) => {
            // A fenced block can hold something unparseable while a valid object
            // sits elsewhere in the prose.
            match first_balanced_object(response) {
                Some(candidate) if candidate != payload => {
                    serde_json::from_str::<serde_json::Value>(candidate)
                        .ok()
                        .filter(|v| v.is_object())
                        .ok_or_else(|| AiError::Parse(fenced_err.to_string()))
                }
                _ => Err(AiError::Parse(fenced_err.to_string())),
            }
        }
    }
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_char_boundary() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn test_truncate_within_bounds() {
        assert_eq!(truncate_to_char_boundary("Hello", 100), "Hello");
    }

    #[test]
    fn fenced_block_is_preferred() {
        let response = "Sure! Here you go:\n```json\n{\"is_breach\": true}\n```\nLet me know {if} needed.";
        assert_eq!(extract_json_payload(response), Some("{\"is_breach\": true}"));
    }

    #[test]
    fn unlabelled_fence_is_accepted() {
        let response = "```\n{\"confidence\": 0.9}\n```";
        assert_eq!(extract_json_payload(response), Some("{\"confidence\": 0.9}"));
    }

    #[test]
    fn falls_back_to_first_balanced_object() {
        let response = "The answer is {\"a\": {\"b\": 1}} and then {\"c\": 2}.";
        assert_eq!(extract_json_payload(response), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_object() {
        let response = r#"prefix {"reasoning": "uses } and { freely", "ok": true} suffix"#;
        let value = parse_json_payload(response).unwrap();
        assert_eq!(value["ok"], serde_json::Value::Bool(true));
        assert_eq!(value["reasoning"], "uses } and { freely");
    }

    #[test]
    fn prose_without_json_fails_closed() {
        assert!(extract_json_payload("I could not decide.").is_none());
        assert!(matches!(
            parse_json_payload("I could not decide."),
            Err(AiError::Parse(_))
        ));
    }

    #[test]
    fn unterminated_object_fails_closed() {
        assert!(parse_json_payload("{\"classification\": \"NEW_BREACH\"").is_err());
    }
}
