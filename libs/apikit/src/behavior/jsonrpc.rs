//! JSON-RPC 2.0 calls over HTTP.
//!
//! [`JsonRpcParam`] collects parameter values, [`JsonRpcMethod`] wraps them
//! in a request envelope once every parameter ran, and [`JsonRpcReturn`]
//! unwraps `result` from the response envelope or fails with its `error`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{ActionBehavior, ParameterBehavior, ReturnBehavior};
use crate::context::{RequestContext, ResponseContext};
use crate::descriptor::{Argument, ParameterDescriptor, ReturnDescriptor};
use crate::error::ApiError;
use crate::media_type;
use crate::properties::PropertyKey;
use crate::request::RequestBody;
use crate::returns::ApiValue;

/// Default `Content-Type` of JSON-RPC requests.
pub const JSON_RPC_CONTENT_TYPE: &str = "application/json-rpc";

/// Priority of [`JsonRpcParam`], ahead of [`JSON_RPC_METHOD_PRIORITY`].
pub const JSON_RPC_PARAM_PRIORITY: i32 = i32::MAX - 1;

/// Priority of [`JsonRpcMethod`]: after every prioritized request behavior.
pub const JSON_RPC_METHOD_PRIORITY: i32 = i32::MAX;

/// Parameters collected for the envelope, in declaration order.
pub const JSON_RPC_PARAMS: PropertyKey<Vec<(String, Value)>> =
    PropertyKey::new("apikit.jsonrpc.params");

/// Id of the request envelope.
pub const JSON_RPC_ID: PropertyKey<u64> = PropertyKey::new("apikit.jsonrpc.id");

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How `params` is laid out in the request envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JsonRpcParamsStyle {
    /// Positional: `[value, ...]`
    #[default]
    Array,
    /// Named: `{"name": value, ...}`
    Object,
}

/// Adds the argument to the JSON-RPC `params`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcParam;

impl JsonRpcParam {
    /// JSON-RPC parameter behavior.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ParameterBehavior for JsonRpcParam {
    fn priority(&self) -> Option<i32> {
        Some(JSON_RPC_PARAM_PRIORITY)
    }

    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let value = match parameter.value() {
            Argument::Value(value) => value.clone(),
            Argument::Pairs(pairs) => Value::Object(
                pairs
                    .iter()
                    .map(|kv| {
                        let value = kv.value.clone().map_or(Value::Null, Value::String);
                        (kv.key.clone(), value)
                    })
                    .collect(),
            ),
            Argument::Bytes(_) => {
                return Err(ApiError::argument(
                    parameter.name(),
                    "raw bytes cannot be sent as a JSON-RPC parameter",
                ));
            }
        };

        let properties = ctx.properties_mut();
        let entry = (parameter.name().to_owned(), value);
        if let Some(params) = properties.get_mut(JSON_RPC_PARAMS) {
            params.push(entry);
        } else {
            properties.insert(JSON_RPC_PARAMS, vec![entry]);
        }
        Ok(())
    }
}

/// Sends the call as a JSON-RPC 2.0 request for `method`.
///
/// Forces `POST` and replaces the body with the envelope. Pair it with
/// [`HttpMethod::post`](super::HttpMethod::post) to set the route.
#[derive(Debug, Clone)]
pub struct JsonRpcMethod {
    method: String,
    params_style: JsonRpcParamsStyle,
    content_type: String,
}

impl JsonRpcMethod {
    /// Call `method` with positional params.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params_style: JsonRpcParamsStyle::Array,
            content_type: JSON_RPC_CONTENT_TYPE.to_owned(),
        }
    }

    /// Lay out `params` as `style`.
    #[must_use]
    pub fn with_params_style(mut self, style: JsonRpcParamsStyle) -> Self {
        self.params_style = style;
        self
    }

    /// Send the envelope as `content_type`.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    fn params(&self, collected: Vec<(String, Value)>) -> Value {
        match self.params_style {
            JsonRpcParamsStyle::Array => {
                Value::Array(collected.into_iter().map(|(_, value)| value).collect())
            }
            JsonRpcParamsStyle::Object => {
                Value::Object(collected.into_iter().collect::<Map<_, _>>())
            }
        }
    }
}

#[async_trait]
impl ActionBehavior for JsonRpcMethod {
    fn priority(&self) -> Option<i32> {
        Some(JSON_RPC_METHOD_PRIORITY)
    }

    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let collected = ctx.properties_mut().remove(JSON_RPC_PARAMS).unwrap_or_default();
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": self.method,
            "params": self.params(collected),
            "id": id,
        });
        tracing::trace!(method = %self.method, id, "JSON-RPC request");

        ctx.properties_mut().insert(JSON_RPC_ID, id);
        let request = ctx.request_mut();
        request.set_method(Method::POST);
        request.set_body(RequestBody::Bytes {
            content: Bytes::from(serde_json::to_vec(&envelope)?),
            content_type: self.content_type.clone(),
        });
        Ok(())
    }
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Produces the `result` member of a JSON-RPC response.
///
/// An `error` member fails the call with [`ApiError::JsonRpc`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcReturn;

impl JsonRpcReturn {
    /// JSON-RPC return behavior.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReturnBehavior for JsonRpcReturn {
    fn accept(&self) -> &str {
        JSON_RPC_CONTENT_TYPE
    }

    fn is_match(&self, content_type: Option<&str>, returns: &ReturnDescriptor) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = media_type::essence(content_type);
        !returns.is_raw()
            && [JSON_RPC_CONTENT_TYPE, "application/json"]
                .iter()
                .any(|accepted| media_type::matches(accepted, essence))
    }

    async fn produce(&self, ctx: &mut ResponseContext) -> Result<ApiValue, ApiError> {
        let body = ctx
            .response_mut()
            .ok_or_else(|| ApiError::Descriptor("no response to produce a result from".into()))?
            .bytes()
            .await?;
        let envelope: ResponseEnvelope = serde_json::from_slice(&body)?;
        if let Some(error) = envelope.error {
            return Err(ApiError::JsonRpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(ApiValue::Json(envelope.result))
    }
}
