use std::time::Duration;
use thiserror::Error;

/// Boxed error used for transport and token failures coming from other crates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of an [`ApiError`].
///
/// Lets callers decide how to react to a failure without matching on every
/// variant of the (non-exhaustive) error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed descriptor, arguments or request. Never retryable.
    Validation,
    /// Network, timeout, cancellation or body-limit failure.
    Transport,
    /// The response status was not successful.
    Status,
    /// No return behavior accepted the response content type.
    UnsupportedResponse,
    /// A bearer token could not be acquired.
    TokenAcquisition,
}

/// API invocation error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApiError {
    /// Descriptor is inconsistent with the call (argument count, unknown action, ...)
    #[error("Invalid action descriptor: {0}")]
    Descriptor(String),

    /// An argument could not be bound to the request
    #[error("Invalid argument '{name}': {reason}")]
    Argument {
        /// Parameter name
        name: String,
        /// Diagnostic message
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme rejected by the transport security mode
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The rejected scheme
        scheme: String,
        /// Why it was rejected
        reason: String,
    },

    /// JSON (de)serialization error
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Form URL decoding error
    #[error("Form decoding failed: {0}")]
    FormDecode(#[from] serde_urlencoded::de::Error),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// Request attempt timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The call's cancellation token fired
    #[error("Request cancelled")]
    Cancelled,

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes")]
    BodyTooLarge {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The response body was already consumed (for example by a stream result)
    #[error("Response body already consumed")]
    BodyConsumed,

    /// HTTP non-2xx status
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        /// Response status
        status: http::StatusCode,
        /// Leading part of the response body
        body_preview: String,
        /// Response `Content-Type`, if any
        content_type: Option<String>,
    },

    /// No return behavior matched the response content type
    #[error("Response content type '{content_type}' is not supported for return type {expected}")]
    UnsupportedResponse {
        /// Response status, `None` when no response was received
        status: Option<http::StatusCode>,
        /// Response `Content-Type`, `<null>` when absent
        content_type: String,
        /// Declared return type name
        expected: &'static str,
    },

    /// The JSON-RPC server answered with an error object
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i64,
        /// Error message
        message: String,
        /// Additional error data, if any
        data: Option<serde_json::Value>,
    },

    /// A fault raised while reading a received response
    ///
    /// Classified like the wrapped error; only adds the response status.
    #[error("{source} (HTTP {status})")]
    Decode {
        /// Response status
        status: http::StatusCode,
        /// The underlying fault
        #[source]
        source: Box<ApiError>,
    },

    /// The produced value does not fit the requested return type
    #[error("Return value mismatch: expected {expected}, got {actual}")]
    ReturnMismatch {
        /// Requested return type
        expected: &'static str,
        /// Produced value kind
        actual: &'static str,
    },

    /// A bearer token could not be acquired
    #[error("Token acquisition failed: {0}")]
    TokenAcquisition(#[source] BoxError),
}

impl ApiError {
    /// Classify the error into the coarse taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Descriptor(_)
            | Self::Argument { .. }
            | Self::Config(_)
            | Self::RequestBuild(_)
            | Self::InvalidHeaderName(_)
            | Self::InvalidHeaderValue(_)
            | Self::InvalidUri { .. }
            | Self::InvalidScheme { .. }
            | Self::Json(_)
            | Self::FormEncode(_)
            | Self::FormDecode(_)
            | Self::ReturnMismatch { .. } => ErrorKind::Validation,
            Self::Transport(_)
            | Self::Timeout(_)
            | Self::Cancelled
            | Self::BodyTooLarge { .. }
            | Self::BodyConsumed => ErrorKind::Transport,
            Self::HttpStatus { .. } | Self::JsonRpc { .. } => ErrorKind::Status,
            Self::UnsupportedResponse { .. } => ErrorKind::UnsupportedResponse,
            Self::TokenAcquisition(_) => ErrorKind::TokenAcquisition,
            Self::Decode { source, .. } => source.kind(),
        }
    }

    /// Response status code the error is annotated with, when one was received.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::HttpStatus { status, .. } | Self::Decode { status, .. } => Some(*status),
            Self::UnsupportedResponse { status, .. } => *status,
            _ => None,
        }
    }

    /// Attach the status of a received response to a fault raised while
    /// reading it. Errors that already carry a status, and cancellation, are
    /// returned unchanged.
    #[must_use]
    pub fn with_response_status(self, status: http::StatusCode) -> Self {
        match self {
            annotated @ (Self::HttpStatus { .. }
            | Self::UnsupportedResponse { .. }
            | Self::Decode { .. }
            | Self::Cancelled) => annotated,
            other => Self::Decode {
                status,
                source: Box::new(other),
            },
        }
    }

    /// Shorthand for [`ApiError::Argument`].
    #[must_use]
    pub fn argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Argument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<hyper_util::client::legacy::Error> for ApiError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ApiError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn transport_error_preserves_source() {
        let err = ApiError::Transport(Box::new(TestError("connection refused")));
        let source = err.source().unwrap();
        assert_eq!(
            source.downcast_ref::<TestError>().unwrap().0,
            "connection refused"
        );
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn unsupported_response_carries_status_and_types() {
        let err = ApiError::UnsupportedResponse {
            status: Some(http::StatusCode::OK),
            content_type: "text/html".to_owned(),
            expected: "alloc::string::String",
        };
        assert_eq!(err.kind(), ErrorKind::UnsupportedResponse);
        assert_eq!(err.status(), Some(http::StatusCode::OK));
        let msg = err.to_string();
        assert!(msg.contains("text/html"), "unexpected message: {msg}");
        assert!(msg.contains("String"), "unexpected message: {msg}");
    }

    #[test]
    fn unsupported_response_without_response_has_no_status() {
        let err = ApiError::UnsupportedResponse {
            status: None,
            content_type: "<null>".to_owned(),
            expected: "()",
        };
        assert_eq!(err.status(), None);
    }

    #[test]
    fn decode_fault_keeps_kind_and_source() {
        let json = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        let err = ApiError::Json(json).with_response_status(http::StatusCode::OK);

        assert_eq!(err.status(), Some(http::StatusCode::OK));
        assert_eq!(err.kind(), ErrorKind::Validation);
        let ApiError::Decode { source, .. } = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert!(matches!(source.as_ref(), ApiError::Json(_)));
        let inner = err.source().unwrap();
        assert!(inner.to_string().starts_with("JSON processing failed"), "{inner}");
        assert!(inner.source().unwrap().is::<serde_json::Error>());
        assert!(err.to_string().ends_with("(HTTP 200 OK)"), "{err}");

        let body = ApiError::BodyTooLarge { limit: 8 }.with_response_status(http::StatusCode::OK);
        assert_eq!(body.kind(), ErrorKind::Transport);
    }

    #[test]
    fn response_status_does_not_wrap_twice() {
        let status = ApiError::HttpStatus {
            status: http::StatusCode::NOT_FOUND,
            body_preview: String::new(),
            content_type: None,
        }
        .with_response_status(http::StatusCode::OK);
        assert_eq!(status.status(), Some(http::StatusCode::NOT_FOUND));
        assert!(matches!(
            ApiError::Cancelled.with_response_status(http::StatusCode::OK),
            ApiError::Cancelled
        ));
    }

    #[test]
    fn validation_errors_have_no_status() {
        let err = ApiError::argument("id", "missing");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "Invalid argument 'id': missing");
    }

    #[test]
    fn token_errors_are_classified() {
        let err = ApiError::TokenAcquisition(Box::new(TestError("endpoint down")));
        assert_eq!(err.kind(), ErrorKind::TokenAcquisition);
        assert!(err.to_string().contains("endpoint down"));
    }
}
