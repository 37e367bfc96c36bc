use std::fmt;
use std::sync::Arc;

use apikit::Transport;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::cache::TokenCache;
use crate::config::CredentialsOptions;
use crate::endpoint::{Grant, TokenEndpoint};
use crate::error::TokenError;
use crate::types::{AccessToken, TokenKey};

/// Supplies valid access tokens for one [`TokenKey`].
///
/// Tokens live in the shared [`TokenCache`], so providers built for the same
/// key share tokens and in-flight fetches. A fetch first tries the refresh
/// token of the previous token (when enabled) and falls back to the full
/// grant if that fails.
pub struct TokenProvider {
    key: TokenKey,
    options: Arc<CredentialsOptions>,
    endpoint: Arc<TokenEndpoint>,
    cache: Arc<TokenCache>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    /// Provider for `key` fetching tokens over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ConfigError`] if `options` fail validation.
    pub fn new(
        key: TokenKey,
        options: CredentialsOptions,
        transport: Arc<dyn Transport>,
        cache: Arc<TokenCache>,
    ) -> Result<Self, TokenError> {
        options.validate()?;
        let options = Arc::new(options);
        Ok(Self {
            key,
            endpoint: Arc::new(TokenEndpoint::new(transport, Arc::clone(&options))),
            options,
            cache,
        })
    }

    /// Cache key of the tokens.
    #[must_use]
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    /// Validated credentials options.
    #[must_use]
    pub fn options(&self) -> &CredentialsOptions {
        &self.options
    }

    /// A valid token, fetched if the cached one is missing or expired.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Cancelled`] if `cancellation` fires first,
    /// otherwise the error of the fetch (shared by all concurrent callers).
    pub async fn token(&self, cancellation: &CancellationToken) -> Result<AccessToken, TokenError> {
        let endpoint = Arc::clone(&self.endpoint);
        let key = self.key.clone();
        let use_refresh_token = self.options.use_refresh_token;
        self.cache
            .get_or_fetch(&self.key, cancellation, move |previous| {
                async move {
                    let refresh_token = previous
                        .as_ref()
                        .and_then(|token| token.refresh_token())
                        .filter(|_| use_refresh_token)
                        .cloned();
                    if let Some(refresh_token) = refresh_token {
                        match endpoint
                            .request(Grant::Refresh(&refresh_token), Some(refresh_token.clone()))
                            .await
                        {
                            Ok(token) => return Ok(token),
                            Err(e) => {
                                tracing::warn!(key = %key, error = %e, "refresh grant failed, requesting a new token");
                            }
                        }
                    }
                    endpoint.request(Grant::Full, None).await
                }
                .boxed()
            })
            .await
    }

    /// Forget the cached token, e.g. after the API rejected it.
    pub fn clear_token(&self) {
        self.cache.clear(&self.key);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use apikit::{HyperTransport, TransportConfig};
    use httpmock::prelude::*;
    use secrecy::ExposeSecret;
    use tracing_test::traced_test;
    use url::Url;

    fn provider(server: &MockServer) -> TokenProvider {
        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        TokenProvider::new(
            TokenKey::new("billing", Some("admin")),
            CredentialsOptions::client_credentials(
                Url::parse(&server.url("/token")).unwrap(),
                "client",
                "secret",
            ),
            Arc::new(transport),
            Arc::new(TokenCache::new()),
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_options() {
        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        let err = TokenProvider::new(
            TokenKey::new("billing", None),
            CredentialsOptions::default(),
            Arc::new(transport),
            Arc::new(TokenCache::new()),
        )
        .unwrap_err();
        assert!(matches!(err, TokenError::ConfigError(_)));
    }

    #[tokio::test]
    #[traced_test]
    async fn refresh_failure_is_logged_without_secrets() {
        let server = MockServer::start_async().await;
        let full = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_includes("grant_type=client_credentials");
                then.status(200)
                    .body(r#"{"access_token":"tok-1","expires_in":0,"refresh_token":"rt-secret"}"#);
            })
            .await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_includes("grant_type=refresh_token");
                then.status(400).body(r#"{"error":"invalid_grant"}"#);
            })
            .await;

        let provider = provider(&server);
        let cancel = CancellationToken::new();
        provider.token(&cancel).await.unwrap();
        let token = provider.token(&cancel).await.unwrap();

        assert_eq!(token.value().expose_secret(), "tok-1");
        full.assert_calls_async(2).await;
        refresh.assert_calls_async(1).await;
        assert!(logs_contain("refresh grant failed"));
        assert!(logs_contain("billing#admin"));
        assert!(!logs_contain("rt-secret"));
    }

    #[tokio::test]
    async fn clear_token_forces_a_new_fetch() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(200)
                    .body(r#"{"access_token":"tok","expires_in":3600}"#);
            })
            .await;

        let provider = provider(&server);
        let cancel = CancellationToken::new();
        provider.token(&cancel).await.unwrap();
        provider.token(&cancel).await.unwrap();
        mock.assert_calls_async(1).await;

        provider.clear_token();
        provider.token(&cancel).await.unwrap();
        mock.assert_calls_async(2).await;
    }
}
