use std::sync::Arc;

use apikit::behavior::FilterBehavior;
use apikit::{ApiError, RequestContext, ResponseContext};
use async_trait::async_trait;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::provider::TokenProvider;

/// Priority of [`OAuthTokenFilter`]: after the request is built, before
/// filters with a higher priority such as the logging filter.
pub const TOKEN_FILTER_PRIORITY: i32 = 0;

/// Sets `Authorization: Bearer <token>` from a [`TokenProvider`] and drops
/// the cached token when the API answers `401 Unauthorized`.
#[derive(Debug, Clone)]
pub struct OAuthTokenFilter {
    provider: Arc<TokenProvider>,
}

impl OAuthTokenFilter {
    /// Filter authorizing requests with tokens of `provider`.
    #[must_use]
    pub fn new(provider: Arc<TokenProvider>) -> Self {
        Self { provider }
    }

    /// Provider the tokens come from.
    #[must_use]
    pub fn provider(&self) -> &Arc<TokenProvider> {
        &self.provider
    }
}

#[async_trait]
impl FilterBehavior for OAuthTokenFilter {
    fn priority(&self) -> Option<i32> {
        Some(TOKEN_FILTER_PRIORITY)
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let token = self.provider.token(ctx.cancellation()).await?;
        let header = token.bearer_header()?;
        ctx.request_mut().headers_mut().insert(AUTHORIZATION, header);
        Ok(())
    }

    async fn on_response(&self, ctx: &mut ResponseContext) {
        if ctx.status() == Some(StatusCode::UNAUTHORIZED) {
            tracing::warn!(
                key = %self.provider.key(),
                action = ctx.descriptor().name(),
                "request unauthorized, clearing token"
            );
            self.provider.clear_token();
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::cache::TokenCache;
    use crate::config::CredentialsOptions;
    use crate::types::TokenKey;
    use apikit::{HyperTransport, TransportConfig};
    use url::Url;

    #[test]
    fn filter_runs_at_token_priority_with_its_provider() {
        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        let provider = Arc::new(
            TokenProvider::new(
                TokenKey::new("billing", None),
                CredentialsOptions::client_credentials(
                    Url::parse("https://login.example.com/token").unwrap(),
                    "client",
                    "secret",
                ),
                Arc::new(transport),
                Arc::new(TokenCache::new()),
            )
            .unwrap(),
        );

        let filter = OAuthTokenFilter::new(Arc::clone(&provider));
        assert!(Arc::ptr_eq(filter.provider(), &provider));
        assert_eq!(filter.priority(), Some(TOKEN_FILTER_PRIORITY));
    }
}
