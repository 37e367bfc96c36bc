//! Behavior extension points and the built-in behaviors.
//!
//! Four kinds of behaviors plug into the pipeline:
//!
//! - [`ActionBehavior`] and [`ParameterBehavior`] build the request
//! - [`FilterBehavior`] wraps the send with a request and a response hook
//! - [`ReturnBehavior`] turns a matching response into the result
//!
//! Every behavior may declare a priority. Lower priorities run first;
//! behaviors without one run after all prioritized ones; ties keep
//! declaration order.

mod jsonrpc;
mod logging;
mod request;
mod result;

pub use jsonrpc::{
    JSON_RPC_CONTENT_TYPE, JSON_RPC_ID, JSON_RPC_METHOD_PRIORITY, JSON_RPC_PARAM_PRIORITY,
    JSON_RPC_PARAMS, JsonRpcMethod, JsonRpcParam, JsonRpcParamsStyle, JsonRpcReturn,
};
pub use logging::{LOG_MESSAGE, LOG_TARGET, LogMessage, LoggingFilter};
pub use request::{
    FormBody, FormDataParam, FormDataText, FormField, HOST_PRIORITY, HeaderParam, HttpHost,
    HttpMethod, JsonBody, METHOD_PRIORITY, PathParam, QueryParam, RawBody, StaticHeader, Timeout,
    TimeoutParam,
};
pub use result::{FormReturn, JsonReturn, RawReturn, TextReturn, default_return_behaviors};

use std::fmt;

use async_trait::async_trait;

use crate::context::{RequestContext, ResponseContext};
use crate::descriptor::{ParameterDescriptor, ReturnDescriptor};
use crate::error::ApiError;
use crate::media_type;
use crate::returns::ApiValue;

/// Request-building hook attached to an action or its interface.
#[async_trait]
pub trait ActionBehavior: Send + Sync + fmt::Debug {
    /// Execution priority (lower runs first, `None` runs last).
    fn priority(&self) -> Option<i32> {
        None
    }

    /// Mutate the request, or complete the call with
    /// [`RequestContext::set_result`].
    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError>;
}

/// Request-building hook attached to one parameter.
#[async_trait]
pub trait ParameterBehavior: Send + Sync + fmt::Debug {
    /// Execution priority (lower runs first, `None` runs last).
    fn priority(&self) -> Option<i32> {
        None
    }

    /// Bind `parameter`'s value to the request.
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError>;
}

/// Cross-cutting hook wrapping the send.
///
/// `on_response` runs for every filter whose `on_request` ran, in reverse
/// order, whether or not the call faulted.
#[async_trait]
pub trait FilterBehavior: Send + Sync + fmt::Debug {
    /// Execution priority (lower runs first, `None` runs last).
    fn priority(&self) -> Option<i32> {
        None
    }

    /// Inspect or mutate the finished request.
    async fn on_request(&self, ctx: &mut RequestContext) -> Result<(), ApiError>;

    /// Inspect the outcome. A fault can only be replaced through
    /// [`ResponseContext::set_result`].
    async fn on_response(&self, ctx: &mut ResponseContext);
}

/// Produces the call result from a response with a matching content type.
#[async_trait]
pub trait ReturnBehavior: Send + Sync + fmt::Debug {
    /// Selection priority (lower is tried first, `None` last).
    fn priority(&self) -> Option<i32> {
        None
    }

    /// Media type this behavior accepts.
    fn accept(&self) -> &str;

    /// Quality announced in the `Accept` header.
    fn quality(&self) -> Option<f32> {
        None
    }

    /// Whether a non-success status fails the call before producing.
    fn ensure_success(&self) -> bool {
        true
    }

    /// Whether this behavior handles a response with `content_type` for the
    /// declared return type.
    fn is_match(&self, content_type: Option<&str>, returns: &ReturnDescriptor) -> bool {
        !returns.is_raw()
            && content_type
                .is_some_and(|ct| media_type::matches(self.accept(), media_type::essence(ct)))
    }

    /// Add the accepted media type to the `Accept` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the media type is not a valid header value.
    fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let value = match self.quality() {
            Some(q) => format!("{}; q={q}", self.accept()),
            None => self.accept().to_owned(),
        };
        ctx.request_mut().append_header("accept", &value)
    }

    /// Produce the result.
    async fn produce(&self, ctx: &mut ResponseContext) -> Result<ApiValue, ApiError>;
}

/// Characters of the body kept in [`ApiError::HttpStatus`].
const PREVIEW_LIMIT: usize = 256;

/// Stable sort by priority, unprioritized items last.
pub(crate) fn sort_by_priority<T>(items: &mut [T], priority: impl Fn(&T) -> Option<i32>) {
    items.sort_by_key(|item| match priority(item) {
        Some(p) => (false, p),
        None => (true, 0),
    });
}

/// Fail with [`ApiError::HttpStatus`] unless the response status is a success.
///
/// # Errors
///
/// Returns the status error, with a preview of the body when it is buffered.
pub fn ensure_success_status(ctx: &ResponseContext) -> Result<(), ApiError> {
    let Some(response) = ctx.response() else {
        return Ok(());
    };
    if response.status().is_success() {
        return Ok(());
    }

    let body_preview = response
        .buffered_body()
        .map(|body| {
            let text = String::from_utf8_lossy(body);
            match text.char_indices().nth(PREVIEW_LIMIT) {
                Some((cut, _)) => format!("{}...", &text[..cut]),
                None => text.into_owned(),
            }
        })
        .unwrap_or_default();

    Err(ApiError::HttpStatus {
        status: response.status(),
        body_preview,
        content_type: response.content_type().map(str::to_owned),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn sort_keeps_declaration_order_for_ties_and_puts_none_last() {
        let mut items = vec![
            ("a", Some(5)),
            ("b", None),
            ("c", Some(1)),
            ("d", Some(1)),
            ("e", Some(10)),
            ("f", None),
        ];
        sort_by_priority(&mut items, |(_, p)| *p);
        let order: Vec<&str> = items.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, ["c", "d", "a", "e", "b", "f"]);
    }

    #[test]
    fn negative_priorities_sort_before_positive() {
        let mut items = vec![Some(0), Some(i32::MIN + 1), None, Some(-3)];
        sort_by_priority(&mut items, |p| *p);
        assert_eq!(items, [Some(i32::MIN + 1), Some(-3), Some(0), None]);
    }
}
