use std::sync::Arc;

use http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::config::HttpApiOptions;
use crate::descriptor::{ActionDescriptor, Argument};
use crate::error::ApiError;
use crate::properties::Properties;
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::returns::ApiValue;
use crate::transport::CompletionMode;

/// Per-call state threaded through the request-building and filter stages.
#[derive(Debug)]
pub struct RequestContext {
    descriptor: Arc<ActionDescriptor>,
    request: ApiRequest,
    properties: Properties,
    cancellation: CancellationToken,
    options: Arc<HttpApiOptions>,
    completion_mode: Option<CompletionMode>,
    short_circuit: Option<ApiValue>,
}

impl RequestContext {
    /// Context for a bound descriptor snapshot.
    #[must_use]
    pub fn new(
        descriptor: ActionDescriptor,
        options: Arc<HttpApiOptions>,
        cancellation: CancellationToken,
    ) -> Self {
        let request = ApiRequest::new(options.http_host.clone());
        Self {
            descriptor: Arc::new(descriptor),
            request,
            properties: Properties::new(),
            cancellation,
            options,
            completion_mode: None,
            short_circuit: None,
        }
    }

    /// Descriptor snapshot with the call's argument values.
    #[must_use]
    pub fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    pub(crate) fn descriptor_arc(&self) -> &Arc<ActionDescriptor> {
        &self.descriptor
    }

    /// Action name.
    #[must_use]
    pub fn action_name(&self) -> &str {
        self.descriptor.name()
    }

    /// Argument value of the parameter called `name`.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.descriptor.parameter(name).map(|p| p.value())
    }

    /// Request under construction.
    #[must_use]
    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// Mutable request under construction.
    pub fn request_mut(&mut self) -> &mut ApiRequest {
        &mut self.request
    }

    /// Property bag shared by the behaviors of this call.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Mutable property bag.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Cancellation signal of the call.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Options of the API this action belongs to.
    #[must_use]
    pub fn options(&self) -> &HttpApiOptions {
        &self.options
    }

    /// Completion mode used for the send: the explicit override if set,
    /// otherwise the one implied by the return type.
    #[must_use]
    pub fn completion_mode(&self) -> CompletionMode {
        self.completion_mode
            .unwrap_or_else(|| self.descriptor.returns().completion_mode())
    }

    /// Override the completion mode.
    pub fn set_completion_mode(&mut self, mode: CompletionMode) {
        self.completion_mode = Some(mode);
    }

    /// Complete the call with `value` without sending anything.
    ///
    /// Remaining request-building behaviors are skipped; filters still run.
    pub fn set_result(&mut self, value: ApiValue) {
        self.short_circuit = Some(value);
    }

    /// Whether a behavior completed the call early.
    #[must_use]
    pub fn is_short_circuited(&self) -> bool {
        self.short_circuit.is_some()
    }

    pub(crate) fn take_short_circuit(&mut self) -> Option<ApiValue> {
        self.short_circuit.take()
    }

    pub(crate) fn take_request(&mut self) -> ApiRequest {
        let base = self.options.http_host.clone();
        std::mem::replace(&mut self.request, ApiRequest::new(base))
    }
}

/// Per-call state of the response stages.
///
/// After the pipeline completes exactly one of result and error is set.
#[derive(Debug)]
pub struct ResponseContext {
    request: RequestContext,
    response: Option<ApiResponse>,
    error: Option<ApiError>,
    result: Option<ApiValue>,
}

impl ResponseContext {
    pub(crate) fn new(request: RequestContext) -> Self {
        Self {
            request,
            response: None,
            error: None,
            result: None,
        }
    }

    /// The request-side context.
    #[must_use]
    pub fn request_context(&self) -> &RequestContext {
        &self.request
    }

    /// Mutable request-side context (property bag access).
    pub fn request_context_mut(&mut self) -> &mut RequestContext {
        &mut self.request
    }

    /// Descriptor snapshot.
    #[must_use]
    pub fn descriptor(&self) -> &ActionDescriptor {
        self.request.descriptor()
    }

    /// Property bag shared by the behaviors of this call.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        self.request.properties()
    }

    /// Mutable property bag.
    pub fn properties_mut(&mut self) -> &mut Properties {
        self.request.properties_mut()
    }

    /// Received response, if the send happened.
    #[must_use]
    pub fn response(&self) -> Option<&ApiResponse> {
        self.response.as_ref()
    }

    /// Mutable response.
    pub fn response_mut(&mut self) -> Option<&mut ApiResponse> {
        self.response.as_mut()
    }

    pub(crate) fn set_response(&mut self, response: ApiResponse) {
        self.response = Some(response);
    }

    /// Take the response out of the context.
    pub fn take_response(&mut self) -> Option<ApiResponse> {
        self.response.take()
    }

    /// Response status, if a response was received.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(ApiResponse::status)
    }

    /// Response `Content-Type`, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.response.as_ref().and_then(ApiResponse::content_type)
    }

    /// Captured fault.
    #[must_use]
    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    /// Record a fault, dropping any result.
    pub fn set_error(&mut self, error: ApiError) {
        self.result = None;
        self.error = Some(error);
    }

    /// Produced result.
    #[must_use]
    pub fn result(&self) -> Option<&ApiValue> {
        self.result.as_ref()
    }

    /// Record the result, dropping any fault.
    ///
    /// Filters call this to substitute a result for a fault.
    pub fn set_result(&mut self, value: ApiValue) {
        self.error = None;
        self.result = Some(value);
    }

    /// Whether the pipeline has an outcome already.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Final outcome of the call.
    ///
    /// # Errors
    ///
    /// Returns the captured fault.
    pub fn into_outcome(self) -> Result<ApiValue, ApiError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(value)) => Ok(value),
            (None, None) => Err(ApiError::Descriptor(format!(
                "action '{}' completed without result",
                self.request.action_name()
            ))),
        }
    }
}
