use serde_json::Value;

use super::error::ParseError;

/// Parses a generation response into a JSON document.
///
/// Accepts a bare JSON value, a value wrapped in a markdown code fence, or a
/// single object surrounded by prose. Anything else is a [`ParseError`].
pub fn parse_structured(text: &str) -> Result<Value, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new("empty output", text));
    }

    let candidate = strip_code_fence(trimmed).unwrap_or(trimmed);
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(value),
        Err(first) => {
            if let Some(inner) = outermost_object(candidate) {
                if let Ok(value) = serde_json::from_str::<Value>(inner) {
                    return Ok(value);
                }
            }
            Err(ParseError::new(first.to_string(), text))
        }
    }
}

/// Like [`parse_structured`] but requires a top-level object.
pub fn parse_document(text: &str) -> Result<Value, ParseError> {
    let value = parse_structured(text)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ParseError::new("expected a JSON object", text))
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    // Skip the language tag on the opening line.
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
