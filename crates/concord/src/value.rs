//! Structured values flowing through operation inputs and outputs.
//!
//! Components exchange small structured payloads: an operation receives one
//! named-argument map and returns another. The engine never interprets the
//! values themselves beyond equality comparison during pattern matching, so
//! `serde_json::Value` is the natural carrier.
//!
//! Argument maps use `BTreeMap` so iteration order is deterministic - the
//! matcher and dispatcher walk these maps, and reproducible ordering keeps
//! cascades reproducible for tests.

use std::collections::BTreeMap;

/// A single structured value (string, number, bool, array, object, null).
pub type Value = serde_json::Value;

/// A named-argument map for one operation input or output.
pub type Args = BTreeMap<String, Value>;

/// Build an [`Args`] map from `"name" => value` pairs.
///
/// Values are converted via `serde_json::Value::from`, so string literals,
/// integers, booleans, and already-built `Value`s all work.
///
/// # Example
///
/// ```ignore
/// use concord_core::args;
///
/// let input = args! { "user" => "u1", "count" => 3 };
/// assert_eq!(input["user"], "u1");
/// ```
#[macro_export]
macro_rules! args {
    () => {
        <$crate::value::Args>::new()
    };
    ($($name:literal => $value:expr),+ $(,)?) => {{
        let mut map = <$crate::value::Args>::new();
        $( map.insert($name.to_string(), <$crate::value::Value>::from($value)); )+
        map
    }};
}

/// Borrow-free lookup helper: fetch a string field from an [`Args`] map.
pub fn str_arg<'a>(args: &'a Args, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_macro_empty() {
        let args: Args = args! {};
        assert!(args.is_empty());
    }

    #[test]
    fn test_args_macro_mixed_types() {
        let args = args! { "name" => "ada", "age" => 36, "active" => true };
        assert_eq!(args["name"], "ada");
        assert_eq!(args["age"], 36);
        assert_eq!(args["active"], true);
    }

    #[test]
    fn test_args_macro_accepts_value() {
        let nested = serde_json::json!({ "a": 1 });
        let args = args! { "payload" => nested.clone() };
        assert_eq!(args["payload"], nested);
    }

    #[test]
    fn test_str_arg() {
        let args = args! { "id" => "u1", "n" => 7 };
        assert_eq!(str_arg(&args, "id"), Some("u1"));
        assert_eq!(str_arg(&args, "n"), None);
        assert_eq!(str_arg(&args, "missing"), None);
    }

    #[test]
    fn test_args_iteration_is_sorted() {
        let args = args! { "z" => 1, "a" => 2, "m" => 3 };
        let keys: Vec<&str> = args.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
    }
}
