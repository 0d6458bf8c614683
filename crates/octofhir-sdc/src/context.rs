//! Expression context.
//!
//! Maps variable names (`patient`, `user`, population-context names,
//! questionnaire variables) to resolved JSON values. Contexts are
//! copy-on-extend: [`PopulationContext::with`] returns a new context and
//! leaves the parent untouched, so repeat instances never see each other's
//! per-index bindings.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct PopulationContext {
    bindings: Arc<IndexMap<String, Value>>,
}

impl PopulationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new context holding this context's bindings plus `name = value`.
    pub fn with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut bindings = (*self.bindings).clone();
        bindings.insert(normalize(name.into()), value);
        Self {
            bindings: Arc::new(bindings),
        }
    }

    /// Bind in place. Only meant for seeding before population starts.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        Arc::make_mut(&mut self.bindings).insert(normalize(name.into()), value);
    }

    /// Look a binding up; a leading `%` is ignored.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name.strip_prefix('%').unwrap_or(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for PopulationContext {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        for (name, value) in iter {
            ctx.insert(name, value);
        }
        ctx
    }
}

fn normalize(name: String) -> String {
    match name.strip_prefix('%') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// Collapse an evaluated collection into a single bindable value.
///
/// One element binds as itself, anything else as an array.
pub fn collection_value(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// Inverse of [`collection_value`]: `null` is empty, arrays are flattened one
/// level and everything else is a singleton.
pub fn into_collection(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_does_not_touch_parent() {
        let root: PopulationContext = [("patient", json!({"id": "p1"}))].into_iter().collect();
        let child = root.with("ConditionRepeat", json!({"id": "c1"}));

        assert!(child.contains("patient"));
        assert!(child.contains("%ConditionRepeat"));
        assert!(!root.contains("ConditionRepeat"));
        assert_eq!(root.len(), 1);
        assert_eq!(child.len(), 2);
    }

    #[test]
    fn test_percent_prefix_is_stripped() {
        let mut ctx = PopulationContext::new();
        ctx.insert("%user", json!({"id": "u1"}));
        assert_eq!(ctx.get("user"), Some(&json!({"id": "u1"})));
        assert_eq!(ctx.iter().map(|(name, _)| name).collect::<Vec<_>>(), vec!["user"]);
    }

    #[test]
    fn test_collection_helpers() {
        assert_eq!(collection_value(vec![json!(1)]), json!(1));
        assert_eq!(collection_value(vec![]), json!([]));
        assert_eq!(collection_value(vec![json!(1), json!(2)]), json!([1, 2]));

        assert!(into_collection(Value::Null).is_empty());
        assert_eq!(into_collection(json!([1, 2])).len(), 2);
        assert_eq!(into_collection(json!({"a": 1})).len(), 1);
    }
}
