use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::TokenError;

/// Identity of one token set: the API it belongs to and an optional alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    api: Arc<str>,
    alias: Option<Arc<str>>,
}

impl TokenKey {
    /// Key for `api`, optionally qualified by `alias`.
    #[must_use]
    pub fn new(api: &str, alias: Option<&str>) -> Self {
        Self {
            api: Arc::from(api),
            alias: alias.map(Arc::from),
        }
    }

    /// API name.
    #[must_use]
    pub fn api(&self) -> &str {
        &self.api
    }

    /// Alias, if any.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}#{alias}", self.api),
            None => f.write_str(&self.api),
        }
    }
}

/// A bearer token with its absolute expiry.
#[derive(Clone)]
pub struct AccessToken {
    value: SecretString,
    refresh_token: Option<SecretString>,
    scope: Option<String>,
    expires_at: Instant,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Token expiring at `expires_at`.
    #[must_use]
    pub fn new(value: SecretString, expires_at: Instant) -> Self {
        Self {
            value,
            refresh_token: None,
            scope: None,
            expires_at,
        }
    }

    /// The raw token.
    #[must_use]
    pub fn value(&self) -> &SecretString {
        &self.value
    }

    /// Refresh token issued with this token.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// Granted scope, when reported.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Instant from which the token is considered expired (margin applied).
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the token is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// `Authorization` header value, marked sensitive.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidResponse`] if the token contains
    /// characters not allowed in a header.
    pub fn bearer_header(&self) -> Result<HeaderValue, TokenError> {
        let mut value =
            HeaderValue::try_from(format!("Bearer {}", self.value.expose_secret())).map_err(
                |_| TokenError::InvalidResponse("access_token is not a valid header value".into()),
            )?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Token endpoint response (RFC 6749 §5.1 and §5.2).
///
/// Deserialize-only so tokens never end up serialized in logs.
#[derive(Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    /// Turn a successful response into a token fetched at `fetched_at`.
    ///
    /// Expiry is `fetched_at + lifetime - margin`, never before `fetched_at`.
    /// `previous_refresh` is kept when the response carries no refresh token.
    pub(crate) fn into_token(
        self,
        fetched_at: Instant,
        margin: Duration,
        default_lifetime: Duration,
        previous_refresh: Option<SecretString>,
    ) -> Result<AccessToken, TokenError> {
        if let Some(tt) = &self.token_type
            && !tt.eq_ignore_ascii_case("bearer")
        {
            return Err(TokenError::UnsupportedTokenType(tt.clone()));
        }
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::InvalidResponse("missing access_token".into()))?;

        let lifetime = self
            .expires_in
            .map_or(default_lifetime, Duration::from_secs);
        Ok(AccessToken {
            value: SecretString::from(access_token),
            refresh_token: self
                .refresh_token
                .map(SecretString::from)
                .or(previous_refresh),
            scope: self.scope,
            expires_at: fetched_at + lifetime.saturating_sub(margin),
        })
    }
}
