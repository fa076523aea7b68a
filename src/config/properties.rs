//! Property store
//!
//! Properties are flat, dot-path keyed values. Nested trees are flattened
//! when they are set, so `{dirs: {build: "out"}}` is stored as `dirs.build`.
//! Values are either literals or producers evaluated on every read.

use crate::config::interpolate::{
    interpolate_value_with, interpolate_with, scalar_to_string, DEFAULT_PATTERN,
};
use crate::error::UsageError;
use chrono::{Local, SecondsFormat, Utc};
use regex::Regex;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Function evaluated each time its property is read
pub type Producer = Arc<dyn Fn() -> Value + Send + Sync>;

/// A property as handed to [`PropertyStore::set_property`]
#[derive(Clone)]
pub enum Property {
    /// Literal value; mappings and sequences are flattened
    Value(Value),
    /// Computed on every read
    Computed(Producer),
}

impl Property {
    /// Wrap a closure as a computed property
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Property::Computed(Arc::new(f))
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Property::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Property::Value(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Property::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Property::Value(Value::String(value))
    }
}

impl From<i64> for Property {
    fn from(value: i64) -> Self {
        Property::Value(Value::from(value))
    }
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Property::Value(Value::Bool(value))
    }
}

/// Named configuration values with placeholder interpolation
pub struct PropertyStore {
    values: BTreeMap<String, Property>,
    pattern: Regex,
}

impl PropertyStore {
    /// Create a store holding the built-in time properties
    pub fn new() -> Self {
        let mut store = PropertyStore {
            values: BTreeMap::new(),
            pattern: Regex::new(DEFAULT_PATTERN).expect("default interpolation pattern is valid"),
        };

        store.insert(
            "timestamp",
            Property::computed(|| Value::from(Utc::now().timestamp_millis())),
        );
        store.insert(
            "datetime",
            Property::computed(|| {
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
            }),
        );
        store.insert(
            "datetimeTz",
            Property::computed(|| {
                Value::String(Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            }),
        );

        store
    }

    /// Replace the placeholder pattern
    pub fn set_pattern(&mut self, pattern: Regex) {
        self.pattern = pattern;
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Set a property.
    ///
    /// Mappings and sequences are flattened under `key`. A string is
    /// interpolated against the current store once, before it is stored.
    pub fn set_property(
        &mut self,
        key: &str,
        value: impl Into<Property>,
    ) -> Result<(), UsageError> {
        if key.is_empty() {
            return Err(UsageError::MissingName);
        }

        match value.into() {
            Property::Value(tree @ (Value::Mapping(_) | Value::Sequence(_))) => {
                self.flatten(key, &tree);
            }
            Property::Value(Value::String(s)) => {
                let interpolated = self.interpolate(&s);
                self.insert(key, Property::Value(Value::String(interpolated)));
            }
            other => self.insert(key, other),
        }

        Ok(())
    }

    /// Flatten a whole tree of properties into the store
    pub fn set_properties(&mut self, tree: &Value) {
        self.flatten("", tree);
    }

    fn flatten(&mut self, prefix: &str, value: &Value) {
        let join = |key: &str| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", prefix, key)
            }
        };

        match value {
            Value::Mapping(map) => {
                for (k, v) in map {
                    let key = scalar_to_string(k).unwrap_or_default();
                    self.flatten(&join(&key), v);
                }
            }
            Value::Sequence(items) => {
                for (i, v) in items.iter().enumerate() {
                    self.flatten(&join(&i.to_string()), v);
                }
            }
            Value::Tagged(tagged) => self.flatten(prefix, &tagged.value),
            leaf => {
                if !prefix.is_empty() {
                    self.insert(prefix, Property::Value(leaf.clone()));
                }
            }
        }
    }

    fn insert(&mut self, key: &str, property: Property) {
        trace!(property = %key, "set property");
        self.values.insert(key.to_string(), property);
    }

    /// Whether a property has been set
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Read a property, evaluating producers and interpolating the result.
    ///
    /// Unknown keys are logged and yield `None`.
    pub fn get_property(&self, key: &str) -> Option<String> {
        trace!(property = %key, "getting property");
        self.resolve(key, &mut Vec::new())
    }

    fn resolve(&self, key: &str, stack: &mut Vec<String>) -> Option<String> {
        if stack.iter().any(|k| k == key) {
            warn!(property = %key, chain = %stack.join(" -> "), "circular property reference");
            return None;
        }

        let raw = match self.values.get(key) {
            Some(Property::Value(v)) => scalar_to_string(v)?,
            Some(Property::Computed(produce)) => {
                trace!(property = %key, "evaluating property");
                scalar_to_string(&produce())?
            }
            None => {
                warn!(property = %key, "property does not exist");
                return None;
            }
        };

        stack.push(key.to_string());
        let value = interpolate_with(&raw, &self.pattern, |name| self.resolve(name, stack));
        stack.pop();

        Some(value)
    }

    /// Replace every placeholder in `s`; unresolved ones become empty
    pub fn interpolate(&self, s: &str) -> String {
        interpolate_with(s, &self.pattern, |name| self.get_property(name))
    }

    /// Interpolate every string leaf of `value` in place
    pub fn interpolate_value(&self, value: &mut Value) {
        interpolate_value_with(value, &self.pattern, &mut |name: &str| {
            self.get_property(name)
        });
    }

    /// All property keys, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStore")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}
