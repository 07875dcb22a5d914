//! C8 — deep merger (SPEC_FULL §4.8).
//!
//! Maps recurse key by key; anything else (lists, scalars, a map meeting a
//! non-map) is replaced wholesale by the override side. Lists never
//! concatenate, even when both sides are lists — see Testable Property 2.

use crate::value::Value;

/// Deep-merge `base` (e.g. a template's inputs) with `over` (e.g. a
/// resource's inputs), `over` winning at every level.
pub fn deep_merge(base: &Value, over: &Value) -> Value {
    match (base, over) {
        (Value::Map(base_entries), Value::Map(over_entries)) => {
            let mut result = base_entries.clone();
            for (key, over_val) in over_entries {
                match result.iter_mut().find(|(k, _)| k == key) {
                    Some((_, existing)) if matches!((&*existing, over_val), (Value::Map(_), Value::Map(_))) => {
                        *existing = deep_merge(existing, over_val);
                    }
                    Some((_, existing)) => *existing = over_val.clone(),
                    None => result.push((key.clone(), over_val.clone())),
                }
            }
            Value::Map(result)
        }
        (_, over) => over.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_lists_replace_never_concatenate() {
        let base = Value::Map(vec![(
            "tags".to_string(),
            Value::List(vec![Value::String("a".into()), Value::String("b".into())]),
        )]);
        let over = Value::Map(vec![("tags".to_string(), Value::List(vec![Value::String("x".into())]))]);
        let merged = deep_merge(&base, &over);
        assert_eq!(
            merged.map_get("tags").unwrap(),
            &Value::List(vec![Value::String("x".into())])
        );
    }

    #[test]
    fn s3_maps_merge_deep_override_wins() {
        let base = Value::Map(vec![(
            "labels".to_string(),
            Value::Map(vec![("a".to_string(), Value::String("1".into())), ("b".to_string(), Value::String("2".into()))]),
        )]);
        let over = Value::Map(vec![(
            "labels".to_string(),
            Value::Map(vec![("b".to_string(), Value::String("9".into())), ("c".to_string(), Value::String("3".into()))]),
        )]);
        let merged = deep_merge(&base, &over);
        let labels = merged.map_get("labels").unwrap();
        assert_eq!(labels.map_get("a").unwrap(), &Value::String("1".into()));
        assert_eq!(labels.map_get("b").unwrap(), &Value::String("9".into()));
        assert_eq!(labels.map_get("c").unwrap(), &Value::String("3".into()));
    }

    #[test]
    fn keys_only_in_one_side_survive() {
        let base = Value::Map(vec![("a".to_string(), Value::Int(1))]);
        let over = Value::Map(vec![("b".to_string(), Value::Int(2))]);
        let merged = deep_merge(&base, &over);
        assert_eq!(merged.map_get("a").unwrap(), &Value::Int(1));
        assert_eq!(merged.map_get("b").unwrap(), &Value::Int(2));
    }

    #[test]
    fn scalar_override_replaces_map() {
        let base = Value::Map(vec![("k".to_string(), Value::Map(vec![("x".to_string(), Value::Int(1))]))]);
        let over = Value::Map(vec![("k".to_string(), Value::String("scalar".into()))]);
        let merged = deep_merge(&base, &over);
        assert_eq!(merged.map_get("k").unwrap(), &Value::String("scalar".into()));
    }
}
