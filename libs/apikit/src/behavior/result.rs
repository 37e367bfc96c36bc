//! Built-in return behaviors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{ReturnBehavior, ensure_success_status};
use crate::context::ResponseContext;
use crate::descriptor::{ReturnDescriptor, ReturnKind};
use crate::error::ApiError;
use crate::key_value::KeyValue;
use crate::media_type;
use crate::response::ApiResponse;
use crate::returns::ApiValue;

/// Media types [`JsonReturn::new`] accepts.
pub const JSON_MEDIA_TYPES: [&str; 3] = [
    "application/json",
    "text/json",
    "application/problem+json",
];

/// Accept quality of the JSON behavior in the default set.
const DEFAULT_JSON_QUALITY: f32 = 0.01;

/// Return behaviors used when an action declares none that match:
/// raw results first, then JSON with a low accept quality.
#[must_use]
pub fn default_return_behaviors() -> Vec<Arc<dyn ReturnBehavior>> {
    vec![
        Arc::new(RawReturn::new()),
        Arc::new(JsonReturn::new().with_quality(DEFAULT_JSON_QUALITY)),
    ]
}

fn response_of(ctx: &mut ResponseContext) -> Result<&mut ApiResponse, ApiError> {
    ctx.response_mut().ok_or_else(no_response)
}

fn no_response() -> ApiError {
    ApiError::Descriptor("no response to produce a result from".into())
}

/// Deserializes JSON bodies.
///
/// An empty body produces `null`.
#[derive(Debug, Clone)]
pub struct JsonReturn {
    media_types: Vec<String>,
    quality: Option<f32>,
    priority: Option<i32>,
    ensure_success: bool,
}

impl Default for JsonReturn {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonReturn {
    /// JSON behavior accepting [`JSON_MEDIA_TYPES`].
    #[must_use]
    pub fn new() -> Self {
        Self::accepting(JSON_MEDIA_TYPES)
    }

    /// JSON behavior accepting exactly `media_types`; the first one is sent
    /// in `Accept`.
    pub fn accepting<I, S>(media_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            media_types: media_types.into_iter().map(Into::into).collect(),
            quality: None,
            priority: None,
            ensure_success: true,
        }
    }

    /// Announce `quality` in `Accept`.
    #[must_use]
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Selection priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Produce from non-success responses too.
    #[must_use]
    pub fn allow_error_status(mut self) -> Self {
        self.ensure_success = false;
        self
    }
}

#[async_trait]
impl ReturnBehavior for JsonReturn {
    fn priority(&self) -> Option<i32> {
        self.priority
    }

    fn accept(&self) -> &str {
        self.media_types
            .first()
            .map_or("application/json", String::as_str)
    }

    fn quality(&self) -> Option<f32> {
        self.quality
    }

    fn ensure_success(&self) -> bool {
        self.ensure_success
    }

    fn is_match(&self, content_type: Option<&str>, returns: &ReturnDescriptor) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = media_type::essence(content_type);
        !returns.is_raw()
            && self
                .media_types
                .iter()
                .any(|accepted| media_type::matches(accepted, essence))
    }

    async fn produce(&self, ctx: &mut ResponseContext) -> Result<ApiValue, ApiError> {
        let body = response_of(ctx)?.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ApiValue::Json(Value::Null));
        }
        Ok(ApiValue::Json(serde_json::from_slice(&body)?))
    }
}

/// Decodes `application/x-www-form-urlencoded` bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormReturn {
    priority: Option<i32>,
}

impl FormReturn {
    /// Form behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selection priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[async_trait]
impl ReturnBehavior for FormReturn {
    fn priority(&self) -> Option<i32> {
        self.priority
    }

    fn accept(&self) -> &str {
        "application/x-www-form-urlencoded"
    }

    async fn produce(&self, ctx: &mut ResponseContext) -> Result<ApiValue, ApiError> {
        let body = response_of(ctx)?.bytes().await?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&body)?;
        Ok(ApiValue::Form(
            pairs.into_iter().map(KeyValue::from).collect(),
        ))
    }
}

/// Reads `text/plain` bodies. Combined with a model return type the text is
/// deserialized as a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReturn {
    priority: Option<i32>,
}

impl TextReturn {
    /// Text behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selection priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[async_trait]
impl ReturnBehavior for TextReturn {
    fn priority(&self) -> Option<i32> {
        self.priority
    }

    fn accept(&self) -> &str {
        "text/plain"
    }

    async fn produce(&self, ctx: &mut ResponseContext) -> Result<ApiValue, ApiError> {
        let text = response_of(ctx)?.text().await?;
        Ok(ApiValue::Text(text))
    }
}

/// Produces raw return types (`()`, `String`, `Bytes`, `ApiResponse`,
/// `ByteStream`) whatever the content type.
///
/// The response itself and streams are handed over regardless of status;
/// the other raw kinds require a success status.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawReturn;

impl RawReturn {
    /// Raw behavior.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReturnBehavior for RawReturn {
    fn accept(&self) -> &str {
        "*/*"
    }

    fn quality(&self) -> Option<f32> {
        Some(0.1)
    }

    fn ensure_success(&self) -> bool {
        // checked per kind in produce
        false
    }

    fn is_match(&self, _content_type: Option<&str>, returns: &ReturnDescriptor) -> bool {
        returns.is_raw()
    }

    async fn produce(&self, ctx: &mut ResponseContext) -> Result<ApiValue, ApiError> {
        let kind = ctx.descriptor().returns().kind();
        if matches!(kind, ReturnKind::RawResponse | ReturnKind::Stream) {
            let response = ctx.take_response().ok_or_else(no_response)?;
            return Ok(ApiValue::Response(response));
        }

        ensure_success_status(ctx)?;
        match kind {
            ReturnKind::Text => Ok(ApiValue::Text(response_of(ctx)?.text().await?)),
            ReturnKind::Bytes => Ok(ApiValue::Bytes(response_of(ctx)?.bytes().await?)),
            _ => Ok(ApiValue::Unit),
        }
    }
}
