use serde_json::{Map, Value};

/// Deep-merge `overlay` into `base`.
///
/// Mappings are merged key by key, recursively. Any other overlay value
/// (scalar, sequence, null) replaces the base value wholesale; sequences are
/// never concatenated.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merge layers in order, later layers winning. Always returns a mapping.
pub fn merge_layers<'a, I>(layers: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        deep_merge(&mut merged, layer.clone());
    }
    merged
}
