use figment::Figment;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ApiError;
use crate::key_value::KeyValueSerializerOptions;

/// Options shared by every action of one API.
///
/// Loaded with figment, typically from a section of the service
/// configuration:
///
/// ```yaml
/// http_host: https://api.example.com/v1/
/// use_logging: true
/// key_value:
///   naming_style: full_name_without_root
///   member_case: camel_case
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpApiOptions {
    /// Base URL relative routes are resolved against
    pub http_host: Option<Url>,
    /// Enables [`LoggingFilter`](crate::behavior::LoggingFilter) output
    pub use_logging: bool,
    /// Default options of query, form and header serialization
    pub key_value: KeyValueSerializerOptions,
}

impl Default for HttpApiOptions {
    fn default() -> Self {
        Self {
            http_host: None,
            use_logging: true,
            key_value: KeyValueSerializerOptions::default(),
        }
    }
}

impl HttpApiOptions {
    /// Default options with a base URL.
    #[must_use]
    pub fn with_host(http_host: Url) -> Self {
        Self {
            http_host: Some(http_host),
            ..Self::default()
        }
    }

    /// Extract the options stored under `key` (the whole figment when
    /// `key` is empty).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the section is malformed or the
    /// options are invalid.
    pub fn from_figment(figment: &Figment, key: &str) -> Result<Self, ApiError> {
        let options: Self = if key.is_empty() {
            figment.extract()
        } else {
            figment.extract_inner(key)
        }
        .map_err(|e| ApiError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the host is not an `http(s)` URL.
    pub fn validate(&self) -> Result<(), ApiError> {
        let Some(host) = &self.http_host else {
            return Ok(());
        };
        if !matches!(host.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "http_host must be an http(s) URL, got '{host}'"
            )));
        }
        if host.cannot_be_a_base() || host.host_str().is_none() {
            return Err(ApiError::Config(format!(
                "http_host '{host}' cannot be used as a base URL"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::key_value::{KeyNamingStyle, MemberCase};
    use figment::providers::Serialized;
    use serde_json::json;

    #[test]
    fn defaults() {
        let options = HttpApiOptions::default();
        assert!(options.http_host.is_none());
        assert!(options.use_logging);
        assert_eq!(options.key_value, KeyValueSerializerOptions::default());
    }

    #[test]
    fn extracts_nested_section() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "clients": {
                "billing": {
                    "http_host": "https://billing.example.com/api/",
                    "use_logging": false,
                    "key_value": {
                        "naming_style": "full_name_with_root",
                        "member_case": "camel_case"
                    }
                }
            }
        })));

        let options = HttpApiOptions::from_figment(&figment, "clients.billing").unwrap();
        assert_eq!(
            options.http_host.as_ref().map(Url::as_str),
            Some("https://billing.example.com/api/")
        );
        assert!(!options.use_logging);
        assert_eq!(options.key_value.naming_style, KeyNamingStyle::FullNameWithRoot);
        assert_eq!(options.key_value.member_case, MemberCase::CamelCase);
        assert_eq!(options.key_value.delimiter, ".");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let figment = Figment::new().merge(Serialized::defaults(json!({})));
        let options = HttpApiOptions::from_figment(&figment, "").unwrap();
        assert_eq!(options, HttpApiOptions::default());
    }

    #[test]
    fn rejects_non_http_host() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "http_host": "ftp://files.example.com/"
        })));
        let err = HttpApiOptions::from_figment(&figment, "").unwrap_err();
        assert!(matches!(err, ApiError::Config(msg) if msg.contains("http(s)")));
    }

    #[test]
    fn rejects_unknown_fields() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "http_hots": "https://typo.example.com/"
        })));
        assert!(matches!(
            HttpApiOptions::from_figment(&figment, ""),
            Err(ApiError::Config(_))
        ));
    }
}
