//! Builders for section documents and chunk replies.

#![allow(dead_code)]

use serde_json::{json, Map, Value};

/// One email in the shape the email validator expects.
pub fn email(n: u32, body: &str) -> Value {
    json!({
        "subject": format!("Day {n}"),
        "preview": format!("Preview {n}"),
        "body": body,
    })
}

/// Chunk reply holding `email{from}..=email{to}`.
pub fn email_chunk(from: u32, to: u32, body: &str) -> Value {
    let map: Map<String, Value> = (from..=to)
        .map(|n| (format!("email{n}"), email(n, body)))
        .collect();
    Value::Object(map)
}

pub fn offer(name: &str, price: &str) -> Value {
    json!({
        "offerName": name,
        "programName": format!("{name} Accelerator"),
        "price": price,
        "deliverables": ["Weekly calls", "Templates"],
        "guarantee": "30-day money back",
    })
}
