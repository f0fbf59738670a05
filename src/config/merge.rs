//! Deep merge of configuration mappings.

use serde_json::{Map, Value};

/// Merges `overlay` on top of `base`.
///
/// When both sides hold a mapping under the same key the two mappings are
/// merged recursively, so nested keys from either side survive. Any other
/// collision is won by `overlay`.
pub fn merge_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            Value::Object(merge_maps(base_map, overlay_map))
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Merges two mappings; see [`merge_values`].
pub fn merge_maps(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in overlay {
        let next = match merged.get(key) {
            Some(existing @ Value::Object(_)) if value.is_object() => merge_values(existing, value),
            _ => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

/// Merges a sequence of mappings left to right; later entries win.
pub fn merge_all<'a, I>(configs: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    configs
        .into_iter()
        .fold(Value::Object(Map::new()), |acc, next| merge_values(&acc, next))
}
