//! Flattening of values into ordered key/value pairs for query strings and
//! form bodies.

mod options;

pub use options::{ArrayIndexFormat, KeyNamingStyle, KeyValueSerializerOptions, MemberCase};

use serde::Serialize;
use serde_json::Value;

use crate::descriptor::Argument;
use crate::error::ApiError;

/// A single key with an optional value.
///
/// Lists of pairs keep insertion order and may contain the same key several
/// times (repeated form fields, array items).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Key
    pub key: String,
    /// Value, `None` for an explicit null
    pub value: Option<String>,
}

impl KeyValue {
    /// Create a pair with a value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Create a pair without value.
    #[must_use]
    pub fn null(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for KeyValue {
    fn from((key, value): (K, V)) -> Self {
        Self::new(key, value)
    }
}

/// Encode pairs as `application/x-www-form-urlencoded`.
///
/// Pairs without value are encoded as `key=`.
///
/// # Errors
///
/// Returns [`ApiError::FormEncode`] if encoding fails.
pub fn encode_pairs(pairs: &[KeyValue]) -> Result<String, ApiError> {
    let fields: Vec<(&str, &str)> = pairs
        .iter()
        .map(|kv| (kv.key.as_str(), kv.value.as_deref().unwrap_or_default()))
        .collect();
    Ok(serde_urlencoded::to_string(fields)?)
}

/// Flattens values into [`KeyValue`] lists.
///
/// Scalars become a single pair under the root key. Objects and arrays are
/// walked recursively and keys are composed according to
/// [`KeyValueSerializerOptions::naming_style`].
pub struct KeyValueSerializer;

impl KeyValueSerializer {
    /// Serialize any `Serialize` value.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Json`] if the value cannot be represented as JSON.
    pub fn serialize<T>(
        key: &str,
        value: &T,
        options: &KeyValueSerializerOptions,
    ) -> Result<Vec<KeyValue>, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let tree = serde_json::to_value(value)?;
        Ok(Self::serialize_json(key, &tree, options))
    }

    /// Serialize a call argument.
    ///
    /// Pre-flattened pairs are returned unchanged; their keys are not subject
    /// to the member casing.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Argument`] for raw byte arguments, which have no
    /// key/value representation.
    pub fn serialize_argument(
        key: &str,
        argument: &Argument,
        options: &KeyValueSerializerOptions,
    ) -> Result<Vec<KeyValue>, ApiError> {
        match argument {
            Argument::Pairs(pairs) => Ok(pairs.clone()),
            Argument::Value(value) => Ok(Self::serialize_json(key, value, options)),
            Argument::Bytes(_) => Err(ApiError::argument(
                key,
                "raw bytes cannot be flattened into key/value pairs",
            )),
        }
    }

    /// Serialize an already built JSON tree.
    #[must_use]
    pub fn serialize_json(
        key: &str,
        value: &Value,
        options: &KeyValueSerializerOptions,
    ) -> Vec<KeyValue> {
        let mut pairs = Vec::new();
        match value {
            Value::Null if options.ignore_null => {}
            Value::Object(_) | Value::Array(_) => match options.naming_style {
                KeyNamingStyle::ShortName => walk_short(key, value, options, &mut pairs),
                KeyNamingStyle::FullNameWithoutRoot => {
                    walk_full(key, value, options, false, &mut pairs);
                }
                KeyNamingStyle::FullNameWithRoot => {
                    walk_full(key, value, options, true, &mut pairs);
                }
            },
            leaf => pairs.push(leaf_pair(key, leaf)),
        }
        pairs
    }
}

fn walk_short(
    key: &str,
    value: &Value,
    options: &KeyValueSerializerOptions,
    out: &mut Vec<KeyValue>,
) {
    match value {
        Value::Object(members) => {
            for (name, member) in members {
                if member.is_null() && options.ignore_null {
                    continue;
                }
                walk_short(&options.member_case.apply(name), member, options, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_short(key, item, options, out);
            }
        }
        leaf => out.push(leaf_pair(key, leaf)),
    }
}

fn walk_full(
    key: &str,
    value: &Value,
    options: &KeyValueSerializerOptions,
    with_root: bool,
    out: &mut Vec<KeyValue>,
) {
    match value {
        Value::Object(members) => {
            for (name, member) in members {
                if member.is_null() && options.ignore_null {
                    continue;
                }
                let name = options.member_case.apply(name);
                let child = if with_root {
                    format!("{key}{}{name}", options.delimiter)
                } else {
                    name
                };
                walk_full(&child, member, options, true, out);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                walk_full(&options.array_key(key, index), item, options, true, out);
            }
        }
        leaf => out.push(leaf_pair(key, leaf)),
    }
}

fn leaf_pair(key: &str, leaf: &Value) -> KeyValue {
    match leaf {
        Value::Null => KeyValue::null(key),
        Value::String(s) => KeyValue::new(key, s.as_str()),
        other => KeyValue::new(key, other.to_string()),
    }
}
