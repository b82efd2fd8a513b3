//! Per-request scratch storage.

use std::collections::HashMap;

use serde_json::Value;

/// Open-ended key-value storage attached to one request.
///
/// Created empty for every request and dropped with it. Handlers and template
/// engines use it to pass values along (the current user, a CSRF token, etc.)
/// without threading extra arguments.
#[derive(Debug, Default, Clone)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Stores `value` under `key`, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut ctx = Context::new();
        assert!(ctx.is_empty());
        ctx.insert("user_id", 123);
        ctx.insert("name", "abc");
        assert_eq!(ctx.get("user_id"), Some(&Value::from(123)));
        assert!(ctx.contains_key("name"));
        assert!(!ctx.contains_key("nokey"));

        assert_eq!(ctx.insert("user_id", 7), Some(Value::from(123)));
        assert_eq!(ctx.remove("name"), Some(Value::from("abc")));
        assert_eq!(ctx.remove("name"), None);
        assert_eq!(ctx.len(), 1);
    }
}
