use std::sync::Arc;

use apikit::transport::CompletionMode;
use apikit::{ApiRequest, KeyValue, RequestBody, Transport};
use base64::{Engine as _, engine::general_purpose};
use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderValue, Method};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientAuthMethod, CredentialsOptions, GrantOptions};
use crate::error::TokenError;
use crate::types::{AccessToken, TokenResponse};

/// Grant of one token request.
#[derive(Clone, Copy)]
pub enum Grant<'a> {
    /// The configured full grant
    Full,
    /// `grant_type=refresh_token`
    Refresh(&'a SecretString),
}

impl Grant<'_> {
    fn name(self, options: &CredentialsOptions) -> &'static str {
        match (self, &options.grant) {
            (Grant::Refresh(_), _) => "refresh_token",
            (Grant::Full, GrantOptions::ClientCredentials) => "client_credentials",
            (Grant::Full, GrantOptions::Password { .. }) => "password",
        }
    }
}

/// Token endpoint client: form-encoded POST, JSON response.
pub struct TokenEndpoint {
    transport: Arc<dyn Transport>,
    options: Arc<CredentialsOptions>,
}

impl TokenEndpoint {
    pub(crate) fn new(transport: Arc<dyn Transport>, options: Arc<CredentialsOptions>) -> Self {
        Self { transport, options }
    }

    /// Request a token with `grant`.
    ///
    /// `previous_refresh` is carried over when a refresh response omits a
    /// new refresh token.
    pub(crate) async fn request(
        &self,
        grant: Grant<'_>,
        previous_refresh: Option<SecretString>,
    ) -> Result<AccessToken, TokenError> {
        let options = &self.options;
        let request = self.build_request(grant)?;
        let grant_type = grant.name(options);
        tracing::debug!(grant_type, "requesting token");

        let fetched_at = Instant::now();
        // detached from callers: the cache owns the fetch
        let mut response = self
            .transport
            .send(request, CompletionMode::FullBody, &CancellationToken::new())
            .await
            .map_err(TokenError::http)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(TokenError::http)?;

        let parsed: Option<TokenResponse> = serde_json::from_slice(&body).ok();
        let error = parsed.as_ref().and_then(|r| r.error.clone());
        if !status.is_success() || error.is_some() {
            let description = parsed.and_then(|r| r.error_description);
            return Err(TokenError::Endpoint {
                status: status.as_u16(),
                error: error.unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("unknown").to_owned()
                }),
                description,
            });
        }

        let parsed = parsed
            .ok_or_else(|| TokenError::InvalidResponse("body is not a JSON token response".into()))?;
        let previous_refresh = match grant {
            Grant::Refresh(_) => previous_refresh,
            Grant::Full => None,
        };
        let token = parsed.into_token(
            fetched_at,
            options.expiry_margin(),
            options.default_lifetime(),
            previous_refresh,
        )?;
        tracing::info!(grant_type, "token acquired");
        Ok(token)
    }

    fn build_request(
        &self,
        grant: Grant<'_>,
    ) -> Result<http::Request<http_body_util::Full<bytes::Bytes>>, TokenError> {
        let options = &self.options;
        let endpoint = options
            .endpoint
            .as_ref()
            .ok_or_else(|| TokenError::ConfigError("endpoint is required".into()))?;

        let mut fields = vec![KeyValue::new("grant_type", grant.name(options))];
        match grant {
            Grant::Refresh(refresh_token) => {
                fields.push(KeyValue::new("refresh_token", refresh_token.expose_secret()));
            }
            Grant::Full => {
                if let GrantOptions::Password { username, password } = &options.grant {
                    fields.push(KeyValue::new("username", username.as_str()));
                    fields.push(KeyValue::new("password", password.expose_secret()));
                }
            }
        }
        if let Some(scope) = &options.scope {
            fields.push(KeyValue::new("scope", scope.as_str()));
        }
        if options.auth_method == ClientAuthMethod::Form {
            fields.push(KeyValue::new("client_id", options.client_id.as_str()));
            let secret = options.client_secret.expose_secret();
            if !secret.is_empty() {
                fields.push(KeyValue::new("client_secret", secret));
            }
        }
        fields.extend(
            options
                .extra
                .iter()
                .map(|(name, value)| KeyValue::new(name.as_str(), value.as_str())),
        );

        let mut request = ApiRequest::new(None);
        request.set_method(Method::POST);
        request.set_path(endpoint.as_str());
        request.set_body(RequestBody::Form(fields));
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        if options.auth_method == ClientAuthMethod::Basic {
            let credentials = format!(
                "{}:{}",
                options.client_id,
                options.client_secret.expose_secret()
            );
            let mut value = HeaderValue::try_from(format!(
                "Basic {}",
                general_purpose::STANDARD.encode(credentials.as_bytes())
            ))
            .map_err(|_| TokenError::ConfigError("client credentials are not header-safe".into()))?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        request
            .into_http()
            .map_err(TokenError::http)
    }
}
