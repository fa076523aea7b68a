//! Placeholder interpolation for strings and YAML trees
//!
//! Placeholders are found with a configurable regex whose single capture
//! group names the property to substitute, `${dotted.path}` by default.

use regex::{Captures, Regex};
use serde_yaml::Value;

/// Default placeholder pattern: `${name}`
pub const DEFAULT_PATTERN: &str = r"\$\{(.+?)\}";

/// Replace every placeholder in `s` with the value returned by `lookup`.
///
/// Placeholders `lookup` cannot resolve are replaced with an empty string.
pub fn interpolate_with<F>(s: &str, pattern: &Regex, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    // Fast path keeps strings without placeholders untouched
    if !pattern.is_match(s) {
        return s.to_string();
    }

    pattern
        .replace_all(s, |caps: &Captures| {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Interpolate every string leaf of a YAML value in place.
///
/// Sequences and mappings are walked recursively; numbers, booleans and
/// nulls pass through unchanged.
pub fn interpolate_value_with<F>(value: &mut Value, pattern: &Regex, lookup: &mut F)
where
    F: FnMut(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            let replaced = interpolate_with(s, pattern, &mut *lookup);
            *s = replaced;
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                interpolate_value_with(item, pattern, lookup);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_value_with(item, pattern, lookup);
            }
        }
        Value::Tagged(tagged) => interpolate_value_with(&mut tagged.value, pattern, lookup),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// String form of a scalar YAML value.
///
/// Returns `None` for sequences and mappings, which have no scalar form.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
