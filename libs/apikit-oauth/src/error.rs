use std::error::Error as StdError;
use std::sync::Arc;

use apikit::ApiError;
use thiserror::Error;

/// Errors of token acquisition.
///
/// `Clone` so that one failed fetch can be delivered to every caller waiting
/// on it. No variant ever carries a secret.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The token request could not be sent or its response not read.
    #[error("token request failed: {0}")]
    Http(#[source] Arc<dyn StdError + Send + Sync>),

    /// The endpoint answered with an OAuth error or a non-success status.
    #[error("token endpoint returned HTTP {status}: {error}")]
    Endpoint {
        /// Response status code
        status: u16,
        /// `error` code, or the status text when the body has none
        error: String,
        /// `error_description`, if any
        description: Option<String>,
    },

    /// The response is not a token response.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The endpoint returned a `token_type` other than `Bearer`.
    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    /// Credentials configuration is invalid or missing.
    #[error("OAuth2 config error: {0}")]
    ConfigError(String),

    /// The caller stopped waiting for the token.
    #[error("token request cancelled")]
    Cancelled,
}

impl TokenError {
    /// [`TokenError::Http`] keeping `err` as the source.
    #[must_use]
    pub fn http(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Http(Arc::new(err))
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Cancelled => ApiError::Cancelled,
            other => ApiError::TokenAcquisition(Box::new(other)),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use apikit::ErrorKind;
    use std::error::Error;

    #[test]
    fn endpoint_error_renders() {
        let e = TokenError::Endpoint {
            status: 400,
            error: "invalid_grant".into(),
            description: Some("refresh token expired".into()),
        };
        assert_eq!(e.to_string(), "token endpoint returned HTTP 400: invalid_grant");
    }

    #[test]
    fn converts_to_token_acquisition_fault() {
        let api: ApiError = TokenError::ConfigError("endpoint is required".into()).into();
        assert_eq!(api.kind(), ErrorKind::TokenAcquisition);
        assert!(api.to_string().contains("endpoint is required"));
    }

    #[test]
    fn http_error_keeps_its_source() {
        let err = TokenError::http(ApiError::Timeout(std::time::Duration::from_secs(3)));
        let copy = err.clone();

        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "Request timed out after 3s");
        assert_eq!(copy.to_string(), "token request failed: Request timed out after 3s");

        let api: ApiError = copy.into();
        let token = api.source().unwrap().downcast_ref::<TokenError>().unwrap();
        assert!(matches!(token, TokenError::Http(_)));
        assert!(token.source().is_some());
    }

    #[test]
    fn cancellation_stays_cancellation() {
        let api: ApiError = TokenError::Cancelled.into();
        assert!(matches!(api, ApiError::Cancelled));
    }
}
