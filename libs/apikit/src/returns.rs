use bytes::Bytes;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::descriptor::ReturnKind;
use crate::error::ApiError;
use crate::key_value::{KeyValue, encode_pairs};
use crate::response::{ApiResponse, ResponseBody};

/// Value produced by a return behavior, before conversion to the caller's
/// declared type.
#[derive(Debug)]
pub enum ApiValue {
    /// No value
    Unit,
    /// Parsed JSON document
    Json(Value),
    /// Parsed form document
    Form(Vec<KeyValue>),
    /// Text body
    Text(String),
    /// Raw body
    Bytes(Bytes),
    /// The response itself
    Response(ApiResponse),
}

impl ApiValue {
    /// Name of the variant, for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Json(_) => "json",
            Self::Form(_) => "form",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Response(_) => "response",
        }
    }
}

/// Types an action can return.
pub trait ApiReturn: Sized + Send + 'static {
    /// Shape used to pick the completion mode and return behavior.
    fn kind() -> ReturnKind;

    /// Convert the produced value.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ReturnMismatch`] if the value has another shape, or
    /// a decoding error if it cannot be converted.
    fn from_value(value: ApiValue) -> Result<Self, ApiError>;
}

fn mismatch<T>(value: &ApiValue) -> ApiError {
    ApiError::ReturnMismatch {
        expected: std::any::type_name::<T>(),
        actual: value.kind_name(),
    }
}

impl ApiReturn for () {
    fn kind() -> ReturnKind {
        ReturnKind::Unit
    }

    fn from_value(_value: ApiValue) -> Result<Self, ApiError> {
        Ok(())
    }
}

impl ApiReturn for String {
    fn kind() -> ReturnKind {
        ReturnKind::Text
    }

    fn from_value(value: ApiValue) -> Result<Self, ApiError> {
        match value {
            ApiValue::Text(text) | ApiValue::Json(Value::String(text)) => Ok(text),
            ApiValue::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl ApiReturn for Bytes {
    fn kind() -> ReturnKind {
        ReturnKind::Bytes
    }

    fn from_value(value: ApiValue) -> Result<Self, ApiError> {
        match value {
            ApiValue::Bytes(bytes) => Ok(bytes),
            ApiValue::Text(text) => Ok(Bytes::from(text)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl ApiReturn for ApiResponse {
    fn kind() -> ReturnKind {
        ReturnKind::RawResponse
    }

    fn from_value(value: ApiValue) -> Result<Self, ApiError> {
        match value {
            ApiValue::Response(response) => Ok(response),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// Response body exposed as a stream of chunks.
#[derive(Debug)]
pub struct ByteStream {
    body: ResponseBody,
}

impl ByteStream {
    /// Next chunk of the body, `None` once exhausted.
    ///
    /// Non-data frames (trailers) are skipped.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, ApiError>> {
        match std::mem::replace(&mut self.body, ResponseBody::Consumed) {
            ResponseBody::Buffered(bytes) => (!bytes.is_empty()).then_some(Ok(bytes)),
            ResponseBody::Streaming(mut body) => loop {
                match body.frame().await? {
                    Ok(frame) => {
                        if let Ok(data) = frame.into_data() {
                            self.body = ResponseBody::Streaming(body);
                            return Some(Ok(data));
                        }
                    }
                    Err(e) => return Some(Err(ApiError::Transport(e))),
                }
            },
            ResponseBody::Consumed => None,
        }
    }

    /// The underlying body.
    #[must_use]
    pub fn into_inner(self) -> ResponseBody {
        self.body
    }
}

impl ApiReturn for ByteStream {
    fn kind() -> ReturnKind {
        ReturnKind::Stream
    }

    fn from_value(value: ApiValue) -> Result<Self, ApiError> {
        match value {
            ApiValue::Response(mut response) => Ok(Self {
                body: response.take_body(),
            }),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// A model deserialized from the response body by a content-negotiated
/// return behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct Model<T>(pub T);

impl<T> Model<T> {
    /// Unwrap the model.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> ApiReturn for Model<T> {
    fn kind() -> ReturnKind {
        ReturnKind::Model
    }

    fn from_value(value: ApiValue) -> Result<Self, ApiError> {
        match value {
            ApiValue::Json(json) => Ok(Self(serde_json::from_value(json)?)),
            ApiValue::Text(text) => Ok(Self(serde_json::from_value(Value::String(text))?)),
            ApiValue::Form(pairs) => {
                let encoded = encode_pairs(&pairs)?;
                Ok(Self(serde_urlencoded::from_str(&encoded)?))
            }
            other => Err(mismatch::<Self>(&other)),
        }
    }
}
