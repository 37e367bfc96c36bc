use std::collections::BTreeMap;
use std::time::Duration;

use figment::Figment;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::TokenError;

/// How client credentials reach the token endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` as form fields.
    #[default]
    Form,
    /// `Authorization: Basic base64(client_id:client_secret)` (RFC 6749 §2.3.1).
    Basic,
}

/// Grant used for a full token fetch.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum GrantOptions {
    /// `grant_type=client_credentials`
    #[default]
    ClientCredentials,
    /// `grant_type=password` (resource owner credentials)
    Password {
        /// Resource owner
        username: String,
        /// Resource owner password
        password: SecretString,
    },
}

/// One set of credentials against one token endpoint.
///
/// ```yaml
/// endpoint: https://login.example.com/oauth2/token
/// client_id: billing-client
/// client_secret: ${BILLING_SECRET}
/// scope: invoices.read invoices.write
/// grant:
///   type: client_credentials
/// expiry_margin_seconds: 60
/// ```
///
/// Secrets are redacted from `Debug` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsOptions {
    /// Token endpoint
    pub endpoint: Option<Url>,
    /// Try the refresh-token grant before a full fetch (default: true)
    pub use_refresh_token: bool,
    /// `OAuth2` client identifier
    pub client_id: String,
    /// `OAuth2` client secret; empty for public clients
    pub client_secret: SecretString,
    /// Requested scope, space separated
    pub scope: Option<String>,
    /// Distinguishes several token sets used by the same API
    pub alias: Option<String>,
    /// Grant of a full fetch
    pub grant: GrantOptions,
    /// Extra form fields sent with every token request
    pub extra: BTreeMap<String, String>,
    /// Where client credentials are sent
    pub auth_method: ClientAuthMethod,
    /// Seconds subtracted from the reported lifetime (default: 60)
    pub expiry_margin_seconds: u64,
    /// Lifetime assumed when the endpoint omits `expires_in` (default: 300)
    pub default_lifetime_seconds: u64,
}

impl Default for CredentialsOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            use_refresh_token: true,
            client_id: String::new(),
            client_secret: SecretString::from(String::new()),
            scope: None,
            alias: None,
            grant: GrantOptions::default(),
            extra: BTreeMap::new(),
            auth_method: ClientAuthMethod::default(),
            expiry_margin_seconds: 60,
            default_lifetime_seconds: 300,
        }
    }
}

impl CredentialsOptions {
    /// Client credentials against `endpoint`.
    #[must_use]
    pub fn client_credentials(
        endpoint: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint),
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            ..Self::default()
        }
    }

    /// Extract the options stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ConfigError`] if the section is malformed or
    /// fails [`validate`](Self::validate).
    pub fn from_figment(figment: &Figment, key: &str) -> Result<Self, TokenError> {
        let options: Self = figment
            .extract_inner(key)
            .map_err(|e| TokenError::ConfigError(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check that the options can produce a token request.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ConfigError`] if:
    /// - `endpoint` is missing or not an `http(s)` URL
    /// - `client_id` is empty
    /// - `client_secret` is empty for the client credentials grant
    pub fn validate(&self) -> Result<(), TokenError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| TokenError::ConfigError("endpoint is required".into()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TokenError::ConfigError(format!(
                "endpoint must be an http(s) URL, got scheme '{}'",
                endpoint.scheme()
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(TokenError::ConfigError(
                "client_id must not be empty".into(),
            ));
        }
        if matches!(self.grant, GrantOptions::ClientCredentials)
            && self.client_secret.expose_secret().is_empty()
        {
            return Err(TokenError::ConfigError(
                "client_secret must not be empty for the client_credentials grant".into(),
            ));
        }
        Ok(())
    }

    /// Margin subtracted from token lifetimes.
    #[must_use]
    pub fn expiry_margin(&self) -> Duration {
        Duration::from_secs(self.expiry_margin_seconds)
    }

    /// Lifetime of tokens without `expires_in`.
    #[must_use]
    pub fn default_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_lifetime_seconds)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use serde_json::json;

    fn endpoint() -> Url {
        Url::parse("https://login.example.com/token").unwrap()
    }

    #[test]
    fn defaults() {
        let options = CredentialsOptions::default();
        assert!(options.use_refresh_token);
        assert_eq!(options.auth_method, ClientAuthMethod::Form);
        assert_eq!(options.expiry_margin(), Duration::from_secs(60));
        assert_eq!(options.default_lifetime(), Duration::from_secs(300));
        assert!(matches!(options.grant, GrantOptions::ClientCredentials));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut options = CredentialsOptions::client_credentials(endpoint(), "id", "hunter2");
        options.grant = GrantOptions::Password {
            username: "ada".into(),
            password: SecretString::from("letmein".to_owned()),
        };
        let debug = format!("{options:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("letmein"));
        assert!(debug.contains("ada"));
    }

    #[test]
    fn loads_password_grant_from_figment() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "oauth": {
                "crm": {
                    "endpoint": "https://login.example.com/token",
                    "client_id": "crm",
                    "scope": "contacts",
                    "alias": "admin",
                    "auth_method": "basic",
                    "grant": { "type": "password", "username": "ada", "password": "pw" },
                    "extra": { "audience": "crm-api" },
                    "expiry_margin_seconds": 5
                }
            }
        })));

        let options = CredentialsOptions::from_figment(&figment, "oauth.crm").unwrap();
        assert_eq!(options.alias.as_deref(), Some("admin"));
        assert_eq!(options.auth_method, ClientAuthMethod::Basic);
        assert_eq!(options.extra.get("audience").map(String::as_str), Some("crm-api"));
        assert_eq!(options.expiry_margin(), Duration::from_secs(5));
        assert_eq!(options.default_lifetime(), Duration::from_secs(300));
        match options.grant {
            GrantOptions::Password { username, password } => {
                assert_eq!(username, "ada");
                assert_eq!(password.expose_secret(), "pw");
            }
            GrantOptions::ClientCredentials => panic!("expected password grant"),
        }
    }

    #[test]
    fn validation() {
        let missing_endpoint = CredentialsOptions {
            client_id: "id".into(),
            ..CredentialsOptions::default()
        };
        assert!(matches!(
            missing_endpoint.validate(),
            Err(TokenError::ConfigError(msg)) if msg.contains("endpoint")
        ));

        let no_secret = CredentialsOptions::client_credentials(endpoint(), "id", "");
        assert!(matches!(
            no_secret.validate(),
            Err(TokenError::ConfigError(msg)) if msg.contains("client_secret")
        ));

        let public_client = CredentialsOptions {
            grant: GrantOptions::Password {
                username: "ada".into(),
                password: SecretString::from("pw".to_owned()),
            },
            ..CredentialsOptions::client_credentials(endpoint(), "id", "")
        };
        assert!(public_client.validate().is_ok());

        let ftp = CredentialsOptions::client_credentials(
            Url::parse("ftp://login.example.com/").unwrap(),
            "id",
            "secret",
        );
        assert!(ftp.validate().is_err());
    }
}
