//! Duplicate-tolerant decoding of name values
//!
//! Name values are JSON objects written by arbitrary clients, and nothing
//! stops them from repeating keys. Every repeated key resolves to its last
//! occurrence. For the `g` field that rule applies per game: repeated `g`
//! objects are folded into one map in document order, so
//! `{"g":{"a":1},"g":{"b":2}}` yields moves for both `a` and `b`.

use serde::de::{Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use super::GameId;

/// Field holding the per-game moves in `p/` name values
pub const MOVES_FIELD: &str = "g";

/// Field holding the admin command in `g/` name values
pub const COMMAND_FIELD: &str = "cmd";

#[derive(Debug, Error)]
pub enum NameValueError {
    #[error("invalid name value: {0}")]
    Json(#[from] serde_json::Error),
}

/// The parts of a name value that games care about
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NameValue {
    /// Game id to move, merged over all `g` occurrences
    pub moves: BTreeMap<GameId, Value>,
    /// Last `cmd` occurrence
    pub command: Option<Value>,
}

impl NameValue {
    pub fn parse(raw: &str) -> Result<Self, NameValueError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl<'de> Deserialize<'de> for NameValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(NameValueVisitor)
    }
}

struct NameValueVisitor;

impl<'de> Visitor<'de> for NameValueVisitor {
    type Value = NameValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<NameValue, A::Error> {
        let mut value = NameValue::default();

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                MOVES_FIELD => {
                    // Within one object serde_json already keeps the last
                    // duplicate; non-object occurrences carry no moves.
                    if let Value::Object(games) = map.next_value::<Value>()? {
                        value.moves.extend(games);
                    }
                }
                COMMAND_FIELD => {
                    value.command = Some(map.next_value()?);
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_moves() {
        let value = NameValue::parse(r#"{"stuff":"foo","g":{"a":[42,false],"b":{"test":true}}}"#)
            .unwrap();
        assert_eq!(value.moves.len(), 2);
        assert_eq!(value.moves["a"], json!([42, false]));
        assert_eq!(value.moves["b"], json!({"test": true}));
        assert!(value.command.is_none());
    }

    #[test]
    fn test_duplicate_g_fields_merge_last_wins() {
        let raw = r#"
          {
            "g": {"a": "a1"},
            "g": {"a": "a2", "b": "b1"},
            "g": {"b": "b2"}
          }
        "#;
        let value = NameValue::parse(raw).unwrap();
        assert_eq!(value.moves["a"], json!("a2"));
        assert_eq!(value.moves["b"], json!("b2"));
    }

    #[test]
    fn test_duplicate_keys_inside_move() {
        let value = NameValue::parse(r#"{"g":{"a":{"x":1,"x":2},"a":{"y":3,"y":4}}}"#).unwrap();
        assert_eq!(value.moves["a"], json!({"y": 4}));
    }

    #[test]
    fn test_command_last_wins() {
        let value = NameValue::parse(r#"{"cmd":"first","cmd":{"second":true}}"#).unwrap();
        assert_eq!(value.command, Some(json!({"second": true})));
    }

    #[test]
    fn test_non_object_g_is_ignored() {
        let value = NameValue::parse(r#"{"g":{"a":1},"g":[1,2]}"#).unwrap();
        assert_eq!(value.moves.len(), 1);

        let value = NameValue::parse(r#"{"g":5}"#).unwrap();
        assert!(value.moves.is_empty());
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(NameValue::parse("[1,2,3]").is_err());
        assert!(NameValue::parse("\"text\"").is_err());
        assert!(NameValue::parse("{\"g\":").is_err());
    }
}
