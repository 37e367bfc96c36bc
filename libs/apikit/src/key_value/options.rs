use heck::{ToLowerCamelCase, ToSnakeCase};
use serde::{Deserialize, Serialize};

/// How keys of nested members are composed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyNamingStyle {
    /// Only the member name is used; nesting information is discarded.
    #[default]
    ShortName,
    /// `parent.member`, without the root key for top-level members.
    FullNameWithoutRoot,
    /// `root.parent.member`.
    FullNameWithRoot,
}

/// Casing applied to member names taken from the serialized value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberCase {
    /// Names are emitted as serialized.
    #[default]
    Original,
    /// `user_name` becomes `userName`.
    CamelCase,
    /// `userName` becomes `user_name`.
    SnakeCase,
}

impl MemberCase {
    /// Apply the casing to a member name.
    #[must_use]
    pub fn apply(self, name: &str) -> String {
        match self {
            Self::Original => name.to_owned(),
            Self::CamelCase => name.to_lower_camel_case(),
            Self::SnakeCase => name.to_snake_case(),
        }
    }
}

/// Suffix appended to an array key for element `i`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayIndexFormat {
    /// `key[0]`
    #[default]
    Brackets,
    /// `key.0`, using the configured delimiter
    Delimited,
    /// `key` repeated for every element
    Repeated,
}

/// Options of the [`KeyValueSerializer`](super::KeyValueSerializer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyValueSerializerOptions {
    /// Key composition for nested members
    pub naming_style: KeyNamingStyle,
    /// Casing of member names
    pub member_case: MemberCase,
    /// Separator between key segments (default: `.`)
    pub delimiter: String,
    /// Array element key suffix
    pub array_index: ArrayIndexFormat,
    /// Drop `null` values instead of emitting a pair without value
    pub ignore_null: bool,
}

impl Default for KeyValueSerializerOptions {
    fn default() -> Self {
        Self {
            naming_style: KeyNamingStyle::default(),
            member_case: MemberCase::default(),
            delimiter: ".".to_owned(),
            array_index: ArrayIndexFormat::default(),
            ignore_null: false,
        }
    }
}

impl KeyValueSerializerOptions {
    /// Options with the given naming style and defaults otherwise.
    #[must_use]
    pub fn with_style(naming_style: KeyNamingStyle) -> Self {
        Self {
            naming_style,
            ..Self::default()
        }
    }

    /// Key of element `index` of the array stored under `key`.
    #[must_use]
    pub fn array_key(&self, key: &str, index: usize) -> String {
        match self.array_index {
            ArrayIndexFormat::Brackets => format!("{key}[{index}]"),
            ArrayIndexFormat::Delimited => format!("{key}{}{index}", self.delimiter),
            ArrayIndexFormat::Repeated => key.to_owned(),
        }
    }
}
