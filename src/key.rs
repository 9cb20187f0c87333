//! Deterministic cache keys.
//!
//! A [`CacheKey`] combines an endpoint key with a canonical rendering of the
//! call arguments. Object members are written in sorted order at every depth,
//! so structurally equal arguments always produce the same key regardless of
//! the order in which their fields were built.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// Identifies one cache entry: an endpoint key plus canonical arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    endpoint: String,
    args: String,
}

impl CacheKey {
    /// Creates a key from an endpoint key and already-serialized arguments.
    #[must_use]
    pub fn new(endpoint: &str, args: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(args, &mut canonical);
        Self {
            endpoint: endpoint.to_string(),
            args: canonical,
        }
    }

    /// Serializes `args` and creates a key from them.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if the arguments cannot be serialized to JSON.
    pub fn from_args<A: Serialize + ?Sized>(endpoint: &str, args: &A) -> Result<Self, ApiError> {
        let value = serde_json::to_value(args)?;
        Ok(Self::new(endpoint, &value))
    }

    /// The endpoint key this entry belongs to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The canonical JSON rendering of the arguments.
    #[must_use]
    pub fn args(&self) -> &str {
        &self.args
    }

    /// A stable 64-bit fingerprint of the key.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.args)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<_> = map.iter().collect();
            members.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (name, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_args_same_key() {
        let a = CacheKey::new("get-jobs", &json!({ "query": { "page": "1" } }));
        let b = CacheKey::new("get-jobs", &json!({ "query": { "page": "1" } }));
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_field_order_is_ignored() {
        let mut first = serde_json::Map::new();
        first.insert("status".into(), json!("applied"));
        first.insert("id".into(), json!(5));
        let mut second = serde_json::Map::new();
        second.insert("id".into(), json!(5));
        second.insert("status".into(), json!("applied"));

        let a = CacheKey::new("user-job-status", &Value::Object(first));
        let b = CacheKey::new("user-job-status", &Value::Object(second));
        assert_eq!(a, b);
        assert_eq!(a.args(), r#"{"id":5,"status":"applied"}"#);
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let key = CacheKey::new("get-jobs", &json!({ "z": [{ "b": 1, "a": 2 }], "a": null }));
        assert_eq!(key.args(), r#"{"a":null,"z":[{"a":2,"b":1}]}"#);
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = CacheKey::new("get-jobs", &json!([1, 2]));
        let b = CacheKey::new("get-jobs", &json!([2, 1]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_endpoint_is_part_of_key() {
        let a = CacheKey::new("user-jobs", &Value::Null);
        let b = CacheKey::new("jobs-stat", &Value::Null);
        assert_ne!(a, b);
        assert_eq!(a.endpoint(), "user-jobs");
    }

    #[test]
    fn test_from_args_struct() {
        #[derive(Serialize)]
        struct Args {
            page: u32,
            tag: &'static str,
        }
        let key = CacheKey::from_args("get-jobs", &Args { page: 2, tag: "rust" })
            .expect("args should serialize");
        assert_eq!(key.to_string(), r#"get-jobs({"page":2,"tag":"rust"})"#);
    }

    #[test]
    fn test_strings_are_escaped() {
        let key = CacheKey::new("get-jobs", &json!({ "q\"": "a\"b" }));
        assert_eq!(key.args(), r#"{"q\"":"a\"b"}"#);
    }
}
