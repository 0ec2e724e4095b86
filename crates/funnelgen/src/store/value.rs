//! Field value encoding and nested-path helpers.

use serde_json::{Map, Value};

pub(crate) const VALUE_TYPE_STRING: &str = "string";
pub(crate) const VALUE_TYPE_JSON: &str = "json";

/// Serializes a field value for storage. Strings are stored verbatim,
/// everything else as JSON.
pub(crate) fn encode(value: &Value) -> Result<(String, &'static str), serde_json::Error> {
    match value {
        Value::String(s) => Ok((s.clone(), VALUE_TYPE_STRING)),
        other => Ok((serde_json::to_string(other)?, VALUE_TYPE_JSON)),
    }
}

pub(crate) fn decode(raw: &str, value_type: &str) -> Result<Value, serde_json::Error> {
    if value_type == VALUE_TYPE_STRING {
        Ok(Value::String(raw.to_string()))
    } else {
        serde_json::from_str(raw)
    }
}

/// Splits `parent.child.grandchild` into `("parent", Some("child.grandchild"))`.
pub(crate) fn split_path(field_id: &str) -> (&str, Option<&str>) {
    match field_id.split_once('.') {
        Some((parent, rest)) => (parent, Some(rest)),
        None => (field_id, None),
    }
}

/// Reads the value at a dotted path inside `value`.
pub(crate) fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

/// Writes `new_value` at a dotted path inside `target`, creating
/// intermediate objects. Returns false when an intermediate value exists
/// but is not an object.
pub(crate) fn set_path(target: &mut Value, path: &str, new_value: Value) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        let Value::Object(map) = current else {
            return false;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), new_value);
            return true;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_preserves_type() {
        for value in [json!("Acme"), json!(997), json!(["a", "b"]), json!({"k": "v"})] {
            let (raw, value_type) = encode(&value).unwrap();
            assert_eq!(decode(&raw, value_type).unwrap(), value);
        }
        assert_eq!(encode(&json!("Acme")).unwrap(), ("Acme".to_string(), "string"));
        assert_eq!(encode(&json!(1)).unwrap().1, "json");
    }

    #[test]
    fn test_decode_string_is_never_parsed() {
        assert_eq!(decode("[1,2]", "string").unwrap(), json!("[1,2]"));
        assert!(decode("not json", "json").is_err());
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("offerName"), ("offerName", None));
        assert_eq!(split_path("optinPage.headline_text"), ("optinPage", Some("headline_text")));
        assert_eq!(split_path("a.b.c"), ("a", Some("b.c")));
    }

    #[test]
    fn test_get_and_set_path() {
        let mut value = json!({"b": {"keep": 1}});
        assert!(set_path(&mut value, "b.c", json!("x")));
        assert!(set_path(&mut value, "d.e", json!(2)));
        assert_eq!(value, json!({"b": {"keep": 1, "c": "x"}, "d": {"e": 2}}));
        assert_eq!(get_path(&value, "b.c"), Some(&json!("x")));
        assert_eq!(get_path(&value, "b.missing"), None);
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut value = json!({"b": "scalar"});
        assert!(!set_path(&mut value, "b.c", json!(1)));
        assert_eq!(value, json!({"b": "scalar"}));
    }
}
