use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tokio_util::sync::CancellationToken;

use super::{CompletionMode, RequestTimeout, Transport, tls};
use crate::error::{ApiError, BoxError};
use crate::response::{ApiResponse, ResponseBody, StreamingBody, collect_limited};

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("apikit/", env!("CARGO_PKG_VERSION"));

/// Which URL schemes the transport accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    /// HTTPS only
    #[default]
    TlsOnly,
    /// HTTPS and plain HTTP (mock servers, local testing)
    AllowInsecureHttp,
}

/// Settings of [`HyperTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout of one request, unless overridden per call (default: 30s)
    pub request_timeout: Duration,
    /// `User-Agent` sent when the request has none
    pub user_agent: String,
    /// Largest body buffered in memory (default: 10 MiB)
    pub max_body_size: usize,
    /// How long idle pooled connections are kept (`None` keeps them forever)
    pub pool_idle_timeout: Option<Duration>,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
    /// Accepted URL schemes
    pub transport: TransportSecurity,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_body_size: 10 * 1024 * 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            transport: TransportSecurity::TlsOnly,
        }
    }
}

impl TransportConfig {
    /// Accept plain HTTP URLs.
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "apikit::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Settings for tests against local mock servers: plain HTTP and a short
    /// timeout.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
        .allow_insecure_http()
    }
}

/// [`Transport`] over a pooled `hyper` client with rustls.
///
/// Cheap to share behind an `Arc`; all calls reuse the connection pool.
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    user_agent: HeaderValue,
    config: TransportConfig,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Build the transport.
    ///
    /// # Errors
    ///
    /// - [`ApiError::InvalidHeaderValue`] if the user agent is not a valid header
    /// - [`ApiError::Config`] if TLS is required but no root certificates are
    ///   available
    pub fn new(config: TransportConfig) -> Result<Self, ApiError> {
        let user_agent = HeaderValue::try_from(config.user_agent.as_str())?;
        let allow_http = config.transport == TransportSecurity::AllowInsecureHttp;
        if allow_http {
            tracing::warn!(
                target: "apikit::security",
                "HyperTransport accepts plain HTTP - traffic will NOT be encrypted"
            );
        }

        let tls = tls::client_config(!allow_http).map_err(ApiError::Config)?;
        let builder = hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls);
        let https = if allow_http {
            builder.https_or_http().enable_all_versions().build()
        } else {
            builder.https_only().enable_all_versions().build()
        };

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout needs a timer
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let client = client_builder.build::<_, Full<Bytes>>(https);

        Ok(Self {
            client,
            user_agent,
            config,
        })
    }

    /// Active settings.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn check_scheme(&self, uri: &http::Uri) -> Result<(), ApiError> {
        match uri.scheme_str() {
            Some("https") => Ok(()),
            Some("http") if self.config.transport == TransportSecurity::AllowInsecureHttp => Ok(()),
            Some("http") => Err(ApiError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "plain HTTP requires TransportSecurity::AllowInsecureHttp".to_owned(),
            }),
            Some(other) => Err(ApiError::InvalidScheme {
                scheme: other.to_owned(),
                reason: "only http and https are supported".to_owned(),
            }),
            None => Err(ApiError::InvalidUri {
                url: uri.to_string(),
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    async fn exchange(
        &self,
        request: http::Request<Full<Bytes>>,
        mode: CompletionMode,
    ) -> Result<ApiResponse, ApiError> {
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();
        let body: StreamingBody = body.map_err(|e| -> BoxError { Box::new(e) }).boxed();

        let body = match mode {
            CompletionMode::HeadersOnly => ResponseBody::Streaming(body),
            CompletionMode::FullBody => {
                ResponseBody::Buffered(collect_limited(body, self.config.max_body_size).await?)
            }
        };
        Ok(ApiResponse::new(
            parts.status,
            parts.headers,
            body,
            self.config.max_body_size,
        ))
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(
        &self,
        mut request: http::Request<Full<Bytes>>,
        mode: CompletionMode,
        cancellation: &CancellationToken,
    ) -> Result<ApiResponse, ApiError> {
        self.check_scheme(request.uri())?;
        if !request.headers().contains_key(USER_AGENT) {
            request
                .headers_mut()
                .insert(USER_AGENT, self.user_agent.clone());
        }
        let timeout = request
            .extensions()
            .get::<RequestTimeout>()
            .map_or(self.config.request_timeout, |t| t.0);

        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            ?mode,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "sending request"
        );

        tokio::select! {
            () = cancellation.cancelled() => Err(ApiError::Cancelled),
            result = tokio::time::timeout(timeout, self.exchange(request, mode)) => {
                result.unwrap_or_else(|_| Err(ApiError::Timeout(timeout)))
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn get(url: &str) -> http::Request<Full<Bytes>> {
        http::Request::get(url).body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn full_body_is_buffered_and_user_agent_added() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ping")
                    .header("user-agent", DEFAULT_USER_AGENT);
                then.status(200).body("pong");
            })
            .await;

        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        let response = transport
            .send(
                get(&server.url("/ping")),
                CompletionMode::FullBody,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.buffered_body().unwrap().as_ref(), b"pong");
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn headers_only_leaves_body_streaming() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stream");
                then.status(200).body("chunked-data");
            })
            .await;

        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        let mut response = transport
            .send(
                get(&server.url("/stream")),
                CompletionMode::HeadersOnly,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(response.buffered_body().is_none());
        assert_eq!(response.text().await.unwrap(), "chunked-data");
    }

    #[tokio::test]
    async fn per_request_timeout_overrides_default() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200).delay(Duration::from_millis(500));
            })
            .await;

        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        let mut request = get(&server.url("/slow"));
        request
            .extensions_mut()
            .insert(RequestTimeout(Duration::from_millis(50)));

        let err = transport
            .send(request, CompletionMode::FullBody, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout(d) if d == Duration::from_millis(50)), "{err}");
    }

    #[tokio::test]
    async fn cancellation_aborts_the_send() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200).delay(Duration::from_secs(2));
            })
            .await;

        let transport = HyperTransport::new(TransportConfig::for_testing()).unwrap();
        let cancellation = CancellationToken::new();
        let trigger = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = transport
            .send(get(&server.url("/slow")), CompletionMode::FullBody, &cancellation)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Cancelled), "{err}");
    }

    #[tokio::test]
    async fn body_limit_is_enforced_in_full_body_mode() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/big");
                then.status(200).body("x".repeat(64));
            })
            .await;

        let config = TransportConfig {
            max_body_size: 16,
            ..TransportConfig::for_testing()
        };
        let transport = HyperTransport::new(config).unwrap();
        let err = transport
            .send(
                get(&server.url("/big")),
                CompletionMode::FullBody,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BodyTooLarge { limit: 16 }), "{err}");
    }

    #[tokio::test]
    async fn plain_http_is_rejected_when_tls_only() {
        let config = TransportConfig::for_testing();
        let transport = HyperTransport {
            config: TransportConfig {
                transport: TransportSecurity::TlsOnly,
                ..config.clone()
            },
            ..HyperTransport::new(config).unwrap()
        };

        let err = transport
            .send(
                get("http://localhost:1/x"),
                CompletionMode::FullBody,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidScheme { ref scheme, .. } if scheme == "http"));
    }
}
