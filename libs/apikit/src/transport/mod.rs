//! Transport seam between the invocation pipeline and the network.
//!
//! The pipeline only depends on [`Transport`]; [`HyperTransport`] is the
//! default implementation over a pooled `hyper` client.

mod hyper_client;
mod tls;

pub use hyper_client::{HyperTransport, TransportConfig, TransportSecurity};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::response::ApiResponse;

/// How much of the response must be received before the transport returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Return once headers arrive; the body stays a stream
    HeadersOnly,
    /// Return once the whole body is buffered
    FullBody,
}

/// Per-request timeout, carried in the request extensions.
///
/// Overrides the transport's default request timeout for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

/// Sends built requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and wait for the response according to `mode`.
    ///
    /// Implementations must return [`ApiError::Cancelled`] promptly once
    /// `cancellation` fires.
    async fn send(
        &self,
        request: http::Request<Full<Bytes>>,
        mode: CompletionMode,
        cancellation: &CancellationToken,
    ) -> Result<ApiResponse, ApiError>;
}
