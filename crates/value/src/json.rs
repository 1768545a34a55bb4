//! Bridges `serde_json::Value` (the wire-shaped representation application
//! records are projected through for field extraction) to the comparator's
//! [`Value`] domain.
//!
//! Dates have no native JSON representation, so we follow the common
//! convention of a single-key wrapper object `{"$date": <epoch millis>}`,
//! consistent with how the original JavaScript engine distinguishes `Date`
//! instances from plain objects at runtime.

use crate::{
    object_id::ObjectIdAllocator,
    value::{
        TotalOrdF64,
        Value,
    },
};

const DATE_KEY: &str = "$date";

/// Converts a JSON value into the comparator's [`Value`] domain. Nested
/// plain objects are assigned a stable [`crate::ObjectId`] keyed by their
/// canonical JSON text, via `objects` — callers that need comparator-stable
/// identity across calls (e.g. a field index) must reuse the same allocator.
pub fn from_json(json: &serde_json::Value, objects: &mut ObjectIdAllocator<String>) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(TotalOrdF64(n.as_f64().unwrap_or(f64::NAN))),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(|v| from_json(v, objects)).collect())
        },
        serde_json::Value::Object(map) => {
            if let Some(date_value) = as_date(map) {
                return Value::Date(date_value);
            }
            let identity = json.to_string();
            Value::Object(objects.allocate(identity))
        },
    }
}

fn as_date(map: &serde_json::Map<String, serde_json::Value>) -> Option<i64> {
    if map.len() != 1 {
        return None;
    }
    map.get(DATE_KEY)?.as_i64()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn dates_are_recognized_by_wrapper_shape() {
        let mut objects = ObjectIdAllocator::new();
        let v = from_json(&json!({"$date": 1_700_000_000_000i64}), &mut objects);
        assert!(matches!(v, Value::Date(1_700_000_000_000)));
    }

    #[test]
    fn plain_objects_get_stable_ids_by_content() {
        let mut objects = ObjectIdAllocator::new();
        let a = from_json(&json!({"x": 1}), &mut objects);
        let b = from_json(&json!({"x": 1}), &mut objects);
        let c = from_json(&json!({"x": 2}), &mut objects);
        let (Value::Object(a_id), Value::Object(b_id), Value::Object(c_id)) = (a, b, c) else {
            panic!("expected object ids");
        };
        assert_eq!(a_id, b_id);
        assert_ne!(a_id, c_id);
    }
}
