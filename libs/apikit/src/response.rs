use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;

use crate::error::{ApiError, BoxError};

/// Type-erased streaming body as handed over by a transport.
pub type StreamingBody = BoxBody<Bytes, BoxError>;

/// Body of an [`ApiResponse`].
pub enum ResponseBody {
    /// Fully read into memory
    Buffered(Bytes),
    /// Not read yet
    Streaming(StreamingBody),
    /// Taken by a stream result
    Consumed,
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
            Self::Consumed => f.write_str("Consumed"),
        }
    }
}

/// HTTP response received for an invocation.
///
/// Depending on the completion mode the body is either already buffered or
/// still streaming. [`bytes`](Self::bytes) buffers a streaming body in place,
/// enforcing the transport's body size limit, so later readers see the same
/// content.
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    max_body_size: usize,
}

impl ApiResponse {
    /// Assemble a response.
    #[must_use]
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: ResponseBody,
        max_body_size: usize,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            max_body_size,
        }
    }

    /// Response with a buffered body, mostly useful for short-circuiting
    /// behaviors and tests.
    #[must_use]
    pub fn buffered(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let limit = body.len();
        Self::new(status, headers, ResponseBody::Buffered(body), limit)
    }

    /// Status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `Content-Type` header, if present and valid text.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// The body, when it has already been buffered.
    #[must_use]
    pub fn buffered_body(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Read the whole body, buffering it in place.
    ///
    /// # Errors
    ///
    /// - [`ApiError::BodyTooLarge`] if the body exceeds the size limit
    /// - [`ApiError::BodyConsumed`] if the body was taken as a stream
    /// - [`ApiError::Transport`] if reading fails
    pub async fn bytes(&mut self) -> Result<Bytes, ApiError> {
        match std::mem::replace(&mut self.body, ResponseBody::Consumed) {
            ResponseBody::Buffered(bytes) => {
                self.body = ResponseBody::Buffered(bytes.clone());
                Ok(bytes)
            }
            ResponseBody::Streaming(body) => {
                let bytes = collect_limited(body, self.max_body_size).await?;
                self.body = ResponseBody::Buffered(bytes.clone());
                Ok(bytes)
            }
            ResponseBody::Consumed => Err(ApiError::BodyConsumed),
        }
    }

    /// Body as UTF-8 text (lossy).
    ///
    /// # Errors
    ///
    /// Same as [`bytes`](Self::bytes).
    pub async fn text(&mut self) -> Result<String, ApiError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Take the body out, leaving [`ResponseBody::Consumed`] behind.
    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Consumed)
    }

    /// Split into status, headers and body.
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, ResponseBody) {
        (self.status, self.headers, self.body)
    }
}

/// Collect a body, failing once it grows past `limit` bytes.
pub async fn collect_limited(mut body: StreamingBody, limit: usize) -> Result<Bytes, ApiError> {
    let mut collected = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ApiError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(ApiError::BodyTooLarge { limit });
            }
            collected.extend_from_slice(chunk);
        }
    }
    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn streaming(content: &'static str) -> ResponseBody {
        ResponseBody::Streaming(
            Full::new(Bytes::from_static(content.as_bytes()))
                .map_err(|never| -> BoxError { match never {} })
                .boxed(),
        )
    }

    #[tokio::test]
    async fn streaming_body_is_buffered_once() {
        let mut response =
            ApiResponse::new(StatusCode::OK, HeaderMap::new(), streaming("hello"), 1024);
        assert!(response.buffered_body().is_none());

        assert_eq!(response.text().await.unwrap(), "hello");
        assert_eq!(response.buffered_body().unwrap().as_ref(), b"hello");
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn limit_is_enforced() {
        let mut response =
            ApiResponse::new(StatusCode::OK, HeaderMap::new(), streaming("0123456789"), 4);
        let err = response.bytes().await.unwrap_err();
        assert!(matches!(err, ApiError::BodyTooLarge { limit: 4 }), "{err}");
    }

    #[test]
    fn response_types_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ApiResponse>();
        assert_send_sync::<ResponseBody>();
        assert_send_sync::<ApiError>();
    }

    #[tokio::test]
    async fn limit_allows_body_of_exact_size() {
        let mut response =
            ApiResponse::new(StatusCode::OK, HeaderMap::new(), streaming("0123"), 4);
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"0123");
    }

    #[tokio::test]
    async fn taken_body_reports_consumed() {
        let mut response = ApiResponse::buffered(StatusCode::OK, HeaderMap::new(), "x");
        assert!(matches!(response.take_body(), ResponseBody::Buffered(_)));
        assert!(matches!(response.bytes().await, Err(ApiError::BodyConsumed)));
    }

    #[test]
    fn content_type_is_read_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let response = ApiResponse::buffered(StatusCode::OK, headers, "{}");
        assert_eq!(response.content_type(), Some("application/json; charset=utf-8"));
    }
}
