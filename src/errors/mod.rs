//! Keyed error accumulation.
//!
//! Validation walks an entire entity and reports every problem it finds, so
//! errors are collected into a map of field name to messages instead of
//! short-circuiting on the first failure.

pub mod messages;

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Key used when a message is not tied to a specific field.
pub const DEFAULT_KEY: &str = "__generic__";

/// A hint that changes how validation treats an [`ErrorCollector`].
///
/// Contexts are set by a caller before invoking a cleaning pass. The only
/// supported option suppresses the required-field check for one field, which
/// import flows use when a value is resolved later from an alternate key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Context {
    IgnoreMissingField(String),
}

/// Accumulates error messages keyed by field name.
#[derive(Debug, Default, Clone)]
pub struct ErrorCollector {
    errors: BTreeMap<String, Vec<String>>,
    contexts: Vec<Context>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a message with a field key. `None` targets the generic key.
    pub fn add(&mut self, key: Option<&str>, message: impl Into<String>) {
        let key = match key {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => DEFAULT_KEY.to_string(),
        };
        self.errors.entry(key).or_default().push(message.into());
    }

    pub fn get(&self, key: Option<&str>) -> Option<&[String]> {
        let key = match key {
            Some(k) if !k.is_empty() => k,
            _ => DEFAULT_KEY,
        };
        self.errors.get(key).map(|m| m.as_slice())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.errors.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of messages across all keys.
    pub fn len(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// Flattens every message into a single list, prefixed with its key.
    pub fn all_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .flat_map(|(key, messages)| {
                messages.iter().map(move |m| format!("{key}: {m}"))
            })
            .collect()
    }

    /// JSON object mapping each key to its newline-joined messages.
    pub fn as_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .errors
            .iter()
            .map(|(key, messages)| (key.clone(), json!(messages.join("\n"))))
            .collect();
        Value::Object(map)
    }

    /// Absorbs another collector's messages, preserving per-key order.
    pub fn merge(&mut self, other: ErrorCollector) {
        for (key, messages) in other.errors {
            self.errors.entry(key).or_default().extend(messages);
        }
    }

    pub fn push_context(&mut self, context: Context) {
        if !self.contexts.contains(&context) {
            self.contexts.push(context);
        }
    }

    pub fn pop_context(&mut self, context: &Context) {
        self.contexts.retain(|c| c != context);
    }

    pub fn has_context(&self, context: &Context) -> bool {
        self.contexts.contains(context)
    }

    /// True when the required-field check is suppressed for `field`.
    pub fn ignores_missing(&self, field: &str) -> bool {
        self.contexts
            .iter()
            .any(|c| matches!(c, Context::IgnoreMissingField(f) if f == field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_defaults_to_generic_key() {
        let mut errors = ErrorCollector::new();
        errors.add(None, "something broke");
        errors.add(Some(""), "twice");
        assert_eq!(
            errors.get(None).unwrap(),
            &["something broke".to_string(), "twice".to_string()]
        );
        assert!(errors.contains_key(DEFAULT_KEY));
    }

    #[test]
    fn len_counts_messages_not_keys() {
        let mut errors = ErrorCollector::new();
        errors.add(Some("a"), "one");
        errors.add(Some("a"), "two");
        errors.add(Some("b"), "three");
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn as_json_joins_messages_per_key() {
        let mut errors = ErrorCollector::new();
        errors.add(Some("name"), "first");
        errors.add(Some("name"), "second");
        assert_eq!(errors.as_json(), json!({"name": "first\nsecond"}));
    }

    #[test]
    fn merge_combines_per_key() {
        let mut left = ErrorCollector::new();
        left.add(Some("a"), "one");
        let mut right = ErrorCollector::new();
        right.add(Some("a"), "two");
        right.add(Some("b"), "three");
        left.merge(right);
        assert_eq!(left.get(Some("a")).unwrap(), &["one".to_string(), "two".to_string()]);
        assert_eq!(left.len(), 3);
    }

    #[test]
    fn context_round_trip() {
        let mut errors = ErrorCollector::new();
        let ctx = Context::IgnoreMissingField("pop__key_name".into());
        assert!(!errors.ignores_missing("pop__key_name"));
        errors.push_context(ctx.clone());
        assert!(errors.ignores_missing("pop__key_name"));
        assert!(!errors.ignores_missing("other"));
        errors.pop_context(&ctx);
        assert!(!errors.ignores_missing("pop__key_name"));
    }
}
