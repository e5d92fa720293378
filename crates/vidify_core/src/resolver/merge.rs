//! Deep merge over JSON values.
//!
//! Rules:
//! - mappings merge key by key, recursively
//! - sequences are replaced wholesale, never concatenated
//! - every other value (scalars, booleans, null) replaces the target

use serde_json::{Map, Value};

/// Merge `overlay` into `target` in place.
pub fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => merge_configuration(target, overlay),
        (target, overlay) => *target = overlay.clone(),
    }
}

/// Merge an override mapping into a stage configuration in place.
///
/// Keys absent from `target` are added.
pub fn merge_configuration(target: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match target.get_mut(key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_replace() {
        let mut target = json!({ "quality": 85, "format": "jpg" });
        deep_merge(&mut target, &json!({ "quality": 95 }));
        assert_eq!(target, json!({ "quality": 95, "format": "jpg" }));
    }

    #[test]
    fn nested_mappings_merge() {
        let mut target = json!({ "audio": { "channels": 2, "bitrate": "128k" } });
        deep_merge(&mut target, &json!({ "audio": { "bitrate": "256k", "codec": "aac" } }));
        assert_eq!(
            target,
            json!({ "audio": { "channels": 2, "bitrate": "256k", "codec": "aac" } })
        );
    }

    #[test]
    fn sequences_replace_wholesale() {
        let mut target = json!({ "formats": ["mp4", "hls"] });
        deep_merge(&mut target, &json!({ "formats": ["dash"] }));
        assert_eq!(target, json!({ "formats": ["dash"] }));
    }

    #[test]
    fn mapping_replaces_scalar_and_vice_versa() {
        let mut target = json!({ "a": 1, "b": { "c": true } });
        deep_merge(&mut target, &json!({ "a": { "x": 1 }, "b": false }));
        assert_eq!(target, json!({ "a": { "x": 1 }, "b": false }));
    }

    #[test]
    fn unknown_keys_are_added() {
        let mut target = Map::new();
        let overlay = json!({ "safety_threshold": "strict" });
        merge_configuration(&mut target, overlay.as_object().unwrap());
        assert_eq!(target.get("safety_threshold"), Some(&json!("strict")));
    }
}
