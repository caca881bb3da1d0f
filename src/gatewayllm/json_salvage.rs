//! Defensive extraction of JSON objects from LLM output.
//!
//! Even with a system message forbidding prose, models wrap their JSON in
//! code fences, prepend apologies, or append commentary. The helpers here
//! strip that noise without ever guessing at content: if no well-formed
//! object can be located the caller gets `None` and must treat the output as
//! a hard error.

use serde_json::Value;

/// Remove a surrounding markdown code fence (```json … ``` or ``` … ```).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language hint on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// Locate the outermost balanced `{…}` in `text`, honouring string literals
/// and escapes.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse an LLM reply into a JSON object, trying progressively harder:
/// verbatim, fence-stripped, then outermost-object extraction.
pub fn parse_loose(text: &str) -> Option<Value> {
    let candidates = [text.trim(), strip_code_fences(text)];
    for candidate in candidates {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
            return Some(v);
        }
    }
    let salvaged = extract_json_object(strip_code_fences(text))?;
    match serde_json::from_str::<Value>(salvaged) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}
