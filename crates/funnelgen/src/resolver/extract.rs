//! Shaped extraction from section documents and intake fallbacks.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::sections::SectionId;
use crate::store::value::get_path;

use super::context::{ContextSummary, IntakeAnswers};

/// Content shapes a lead magnet title has been stored under, newest first.
pub(crate) const FREE_GIFT_PATHS: &[&str] = &[
    "title",
    "leadMagnetTitle",
    "freeGift.title",
    "freeGift.name",
    "titleAndHook.mainTitle",
    "name",
];

/// Flattens any JSON value into one line of text. Arrays are joined with
/// `"; "`, objects render as `key: value` pairs.
pub(crate) fn flatten_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(flatten_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k, flatten_text(v)))
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("; "),
    }
}

/// First non-blank value among the dotted `paths`, flattened.
pub(crate) fn text_at(content: Option<&Value>, paths: &[&str]) -> String {
    let Some(content) = content else {
        return String::new();
    };
    paths
        .iter()
        .filter_map(|path| get_path(content, path))
        .map(flatten_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Intake keys that stand in for a section's document keys.
fn fallback_fields(section: SectionId) -> &'static [(&'static str, &'static [&'static str])] {
    match section {
        SectionId::IdealClient => &[
            ("bestIdealClient", &["idealClient", "targetAudience"]),
            ("demographics", &["demographics", "idealClient"]),
            ("challenges", &["challenges", "problems"]),
            ("desires", &["desires", "outcomes"]),
        ],
        SectionId::Message => &[
            ("oneLineMessage", &["message", "uniqueValue"]),
            ("signatureMethodName", &["methodName"]),
            ("coreMessage", &["message", "uniqueValue"]),
        ],
        SectionId::Story => &[
            ("summary", &["story", "background"]),
            ("signatureStory", &["story"]),
        ],
        SectionId::Offer => &[
            ("offerName", &["offerName", "offer"]),
            ("programName", &["programName", "offerName"]),
            ("price", &["price", "pricing"]),
            ("deliverables", &["deliverables"]),
        ],
        SectionId::LeadMagnet => &[("title", &["freeGift", "leadMagnet"])],
        _ => &[],
    }
}

/// Minimal stand-in document for a missing section, built from intake
/// answers. Keys without an answer are left out.
pub(crate) fn fallback_content(section: SectionId, intake: &IntakeAnswers) -> Value {
    let mut map = Map::new();
    for (key, sources) in fallback_fields(section) {
        if let Some(text) = intake.first_text(sources) {
            map.insert((*key).to_string(), Value::String(text));
        }
    }
    Value::Object(map)
}

/// Pulls the shaped summary values out of whichever sections are present.
pub(crate) fn summarize(sections: &BTreeMap<SectionId, Value>) -> ContextSummary {
    let ideal = sections.get(&SectionId::IdealClient);
    let message = sections.get(&SectionId::Message);
    let story = sections.get(&SectionId::Story);
    let offer = sections.get(&SectionId::Offer);
    let lead_magnet = sections.get(&SectionId::LeadMagnet);

    ContextSummary {
        ideal_client: text_at(ideal, &["bestIdealClient", "idealClient", "summary"]),
        demographics: text_at(ideal, &["demographics", "bestIdealClient.demographics"]),
        challenges: text_at(
            ideal,
            &["challenges", "painPoints", "bestIdealClient.challenges"],
        ),
        desires: text_at(ideal, &["desires", "goals", "bestIdealClient.desires"]),
        one_line_message: text_at(message, &["oneLineMessage", "oneLiner", "message"]),
        signature_method_name: text_at(message, &["signatureMethodName", "methodName"]),
        core_message: text_at(message, &["coreMessage"]),
        story_summary: text_at(story, &["summary", "storySummary", "signatureStory"]),
        free_gift_name: text_at(lead_magnet, FREE_GIFT_PATHS),
        offer_name: text_at(offer, &["offerName", "name"]),
        program_name: text_at(offer, &["programName", "offerName"]),
        offer_pricing: text_at(offer, &["price", "pricing.price", "pricing", "investment"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_text() {
        assert_eq!(flatten_text(&json!(null)), "");
        assert_eq!(flatten_text(&json!("  hi ")), "hi");
        assert_eq!(flatten_text(&json!(997)), "997");
        assert_eq!(flatten_text(&json!(["a", "", "b"])), "a; b");
        assert_eq!(flatten_text(&json!({"age": "30-45", "empty": ""})), "age: 30-45");
    }

    #[test]
    fn test_text_at_tries_paths_in_order() {
        let content = json!({"title": "", "freeGift": {"name": "The Guide"}});
        assert_eq!(text_at(Some(&content), FREE_GIFT_PATHS), "The Guide");
        assert_eq!(text_at(None, FREE_GIFT_PATHS), "");
    }

    #[test]
    fn test_fallback_content_from_intake() {
        let intake = IntakeAnswers::new()
            .with("offer", "Acme")
            .with("pricing", "$997");
        let fallback = fallback_content(SectionId::Offer, &intake);
        assert_eq!(fallback, json!({"offerName": "Acme", "price": "$997"}));
        assert_eq!(fallback_content(SectionId::Sms, &intake), json!({}));
    }

    #[test]
    fn test_summarize_historical_shapes() {
        let mut sections = BTreeMap::new();
        sections.insert(
            SectionId::IdealClient,
            json!({"bestIdealClient": {"demographics": "Women 35-50"}, "challenges": ["burnout"]}),
        );
        sections.insert(
            SectionId::LeadMagnet,
            json!({"titleAndHook": {"mainTitle": "5-Day Reset"}}),
        );
        sections.insert(SectionId::Offer, json!({"pricing": {"price": "$2,000"}}));

        let summary = summarize(&sections);
        assert_eq!(summary.demographics, "Women 35-50");
        assert_eq!(summary.challenges, "burnout");
        assert_eq!(summary.free_gift_name, "5-Day Reset");
        assert_eq!(summary.offer_pricing, "$2,000");
        assert_eq!(summary.story_summary, "");
    }
}
