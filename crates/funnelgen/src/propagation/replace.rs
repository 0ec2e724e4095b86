//! Literal, case-insensitive text substitution over JSON values.

use std::ops::Range;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

/// Replaces every case-insensitive occurrence of one literal with another.
///
/// Occurrences of the old literal that sit inside an occurrence of the new
/// one are left alone, so renaming "Acme" to "Acme Pro" never produces
/// "Acme Pro Pro" and applying the same rename twice changes nothing. The
/// new value only counts when it ends on a word boundary: "Acme
/// Professional" still has an "Acme" to rename.
#[derive(Debug, Clone)]
pub struct Replacer {
    pattern: Regex,
    guard: Option<Regex>,
    replacement: String,
}

impl Replacer {
    /// Returns `None` when there is nothing to replace: a blank old value
    /// or identical values.
    pub fn new(old: &str, new: &str) -> Result<Option<Self>, regex::Error> {
        if old.trim().is_empty() || old == new {
            return Ok(None);
        }

        let (old_lower, new_lower) = (old.to_lowercase(), new.to_lowercase());
        // A case-only change has to match exactly, or the guard would
        // protect every occurrence.
        if old_lower == new_lower {
            return Ok(Some(Self {
                pattern: literal_pattern(old, false)?,
                guard: None,
                replacement: new.to_string(),
            }));
        }

        let pattern = literal_pattern(old, true)?;
        let guard = if new_lower.contains(&old_lower) {
            Some(literal_pattern(new, true)?)
        } else {
            None
        };

        Ok(Some(Self {
            pattern,
            guard,
            replacement: new.to_string(),
        }))
    }

    /// Counts the occurrences [`replace_str`](Self::replace_str) would
    /// substitute.
    pub fn count(&self, text: &str) -> usize {
        let protected = self.protected_spans(text);
        self.pattern
            .find_iter(text)
            .filter(|m| !is_protected(&protected, m.range()))
            .count()
    }

    pub fn replace_str(&self, text: &str) -> (String, usize) {
        let protected = self.protected_spans(text);
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut count = 0;

        for m in self.pattern.find_iter(text) {
            if is_protected(&protected, m.range()) {
                continue;
            }
            out.push_str(&text[last..m.start()]);
            out.push_str(&self.replacement);
            last = m.end();
            count += 1;
        }

        if count == 0 {
            return (text.to_string(), 0);
        }
        out.push_str(&text[last..]);
        (out, count)
    }

    /// Substitutes inside every string leaf of `value`. Object keys, numbers
    /// and booleans are never touched, so the result keeps the input's shape.
    pub fn replace_value(&self, value: &Value) -> (Value, usize) {
        match value {
            Value::String(s) => {
                let (replaced, count) = self.replace_str(s);
                (Value::String(replaced), count)
            }
            Value::Array(items) => {
                let mut total = 0;
                let items = items
                    .iter()
                    .map(|item| {
                        let (replaced, count) = self.replace_value(item);
                        total += count;
                        replaced
                    })
                    .collect();
                (Value::Array(items), total)
            }
            Value::Object(map) => {
                let mut total = 0;
                let map = map
                    .iter()
                    .map(|(key, item)| {
                        let (replaced, count) = self.replace_value(item);
                        total += count;
                        (key.clone(), replaced)
                    })
                    .collect();
                (Value::Object(map), total)
            }
            other => (other.clone(), 0),
        }
    }

    fn protected_spans(&self, text: &str) -> Vec<Range<usize>> {
        match &self.guard {
            Some(guard) => guard
                .find_iter(text)
                .filter(|m| ends_on_word_boundary(text, m.start(), m.end()))
                .map(|m| m.range())
                .collect(),
            None => Vec::new(),
        }
    }
}

fn literal_pattern(literal: &str, case_insensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&regex::escape(literal))
        .case_insensitive(case_insensitive)
        .build()
}

/// True unless the match ends in a word character that continues into the
/// following text.
fn ends_on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let last = text[start..end].chars().next_back();
    let next = text[end..].chars().next();
    !matches!((last, next), (Some(l), Some(n)) if is_word_char(l) && is_word_char(n))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_protected(protected: &[Range<usize>], span: Range<usize>) -> bool {
    protected
        .iter()
        .any(|p| p.start <= span.start && span.end <= p.end)
}

/// Text form of an atomic field value. Only scalars can be propagated.
pub(crate) fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
