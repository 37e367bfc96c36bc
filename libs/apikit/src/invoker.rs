use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::behavior::{
    FilterBehavior, ReturnBehavior, default_return_behaviors, ensure_success_status,
    sort_by_priority,
};
use crate::config::HttpApiOptions;
use crate::context::{RequestContext, ResponseContext};
use crate::descriptor::{ActionDescriptor, Argument};
use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::returns::{ApiReturn, ApiValue};
use crate::transport::Transport;

/// Runs calls through the behavior pipeline.
///
/// One invoker serves every action of an API; it owns the transport, the
/// shared options, filters applied to every action and the default return
/// behaviors.
pub struct ActionInvoker {
    transport: Arc<dyn Transport>,
    options: Arc<HttpApiOptions>,
    global_filters: Vec<Arc<dyn FilterBehavior>>,
    default_returns: Vec<Arc<dyn ReturnBehavior>>,
}

impl fmt::Debug for ActionInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionInvoker")
            .field("options", &self.options)
            .field("global_filters", &self.global_filters)
            .field("default_returns", &self.default_returns)
            .finish_non_exhaustive()
    }
}

impl ActionInvoker {
    /// Invoker with no global filter and [`default_return_behaviors`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: HttpApiOptions) -> Self {
        Self {
            transport,
            options: Arc::new(options),
            global_filters: Vec::new(),
            default_returns: default_return_behaviors(),
        }
    }

    /// Add a filter run for every action, ordered with the action's own
    /// filters by priority.
    #[must_use]
    pub fn with_global_filter(mut self, filter: Arc<dyn FilterBehavior>) -> Self {
        self.global_filters.push(filter);
        self
    }

    /// Replace the default return behaviors.
    #[must_use]
    pub fn with_default_returns(mut self, behaviors: Vec<Arc<dyn ReturnBehavior>>) -> Self {
        self.default_returns = behaviors;
        self
    }

    /// Shared options.
    #[must_use]
    pub fn options(&self) -> &HttpApiOptions {
        &self.options
    }

    /// Call `descriptor` with positional `arguments`.
    ///
    /// # Errors
    ///
    /// Returns the fault of the first failing stage, unless a filter
    /// substituted a result for it.
    pub async fn invoke(
        &self,
        descriptor: &ActionDescriptor,
        arguments: Vec<Argument>,
        cancellation: CancellationToken,
    ) -> Result<ApiValue, ApiError> {
        let bound = descriptor.bind(arguments)?;
        let span = tracing::debug_span!("apikit.invoke", action = %descriptor.name());
        let ctx = RequestContext::new(bound, Arc::clone(&self.options), cancellation);
        self.execute(ctx).instrument(span).await.into_outcome()
    }

    /// Call `descriptor` and convert the result to `R`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ReturnMismatch`] if `R` is not the declared return
    /// type, otherwise as [`invoke`](Self::invoke).
    pub async fn invoke_as<R: ApiReturn>(
        &self,
        descriptor: &ActionDescriptor,
        arguments: Vec<Argument>,
        cancellation: CancellationToken,
    ) -> Result<R, ApiError> {
        let declared = descriptor.returns();
        if declared.kind() != R::kind() {
            return Err(ApiError::ReturnMismatch {
                expected: declared.type_name(),
                actual: std::any::type_name::<R>(),
            });
        }
        let value = self.invoke(descriptor, arguments, cancellation).await?;
        R::from_value(value)
    }

    /// Run the pipeline on a prepared context.
    ///
    /// The returned context holds exactly one of result and error.
    pub async fn execute(&self, mut ctx: RequestContext) -> ResponseContext {
        let descriptor = Arc::clone(ctx.descriptor_arc());
        let returns = self.return_behaviors(&descriptor);
        let mut filters: Vec<Arc<dyn FilterBehavior>> = self
            .global_filters
            .iter()
            .chain(descriptor.filters())
            .cloned()
            .collect();
        sort_by_priority(&mut filters, |f| f.priority());

        let mut fault = None;
        for binding in descriptor.actions() {
            if ctx.is_short_circuited() {
                break;
            }
            if let Err(e) = binding.before_send(&mut ctx).await {
                fault = Some(e);
                break;
            }
        }

        if fault.is_none() && !ctx.is_short_circuited() {
            fault = returns
                .iter()
                .try_for_each(|behavior| behavior.before_send(&mut ctx))
                .err();
        }

        let mut entered = 0;
        if fault.is_none() {
            for filter in &filters {
                entered += 1;
                if let Err(e) = filter.on_request(&mut ctx).await {
                    fault = Some(e);
                    break;
                }
            }
        }

        let shortcut = ctx.take_short_circuit();
        let sent = if fault.is_none() && shortcut.is_none() {
            Some(self.send(&mut ctx).await)
        } else {
            None
        };

        let mut response_ctx = ResponseContext::new(ctx);
        if let Some(e) = fault {
            response_ctx.set_error(e);
        } else if let Some(value) = shortcut {
            tracing::debug!("pipeline short-circuited before send");
            response_ctx.set_result(value);
        } else if let Some(sent) = sent {
            match sent {
                Ok(response) => response_ctx.set_response(response),
                Err(e) => response_ctx.set_error(e),
            }
        }

        for filter in filters[..entered].iter().rev() {
            filter.on_response(&mut response_ctx).await;
        }

        if !response_ctx.is_completed() {
            match select_result(&returns, &mut response_ctx).await {
                Ok(value) => response_ctx.set_result(value),
                Err(e) => response_ctx.set_error(e),
            }
        }

        if let Some(e) = response_ctx.error() {
            tracing::debug!(error = %e, status = ?e.status(), "action failed");
        }
        response_ctx
    }

    async fn send(&self, ctx: &mut RequestContext) -> Result<ApiResponse, ApiError> {
        let request = ctx.take_request().into_http()?;
        tracing::trace!(method = %request.method(), uri = %request.uri(), "sending request");
        self.transport
            .send(request, ctx.completion_mode(), ctx.cancellation())
            .await
    }

    /// Explicit return behaviors, then the defaults whose media type is not
    /// already accepted by an explicit one.
    fn return_behaviors(&self, descriptor: &ActionDescriptor) -> Vec<Arc<dyn ReturnBehavior>> {
        let explicit = descriptor.return_behaviors();
        let defaults = self.default_returns.iter().filter(|default| {
            !explicit
                .iter()
                .any(|e| e.accept().eq_ignore_ascii_case(default.accept()))
        });
        explicit.iter().chain(defaults).cloned().collect()
    }
}

async fn select_result(
    returns: &[Arc<dyn ReturnBehavior>],
    ctx: &mut ResponseContext,
) -> Result<ApiValue, ApiError> {
    let declared = *ctx.descriptor().returns();
    let content_type = ctx.content_type().map(str::to_owned);
    let status = ctx.status();

    let Some(behavior) = returns
        .iter()
        .find(|b| b.is_match(content_type.as_deref(), &declared))
    else {
        return Err(ApiError::UnsupportedResponse {
            status,
            content_type: content_type.unwrap_or_else(|| "<null>".to_owned()),
            expected: declared.type_name(),
        });
    };

    if behavior.ensure_success() {
        ensure_success_status(ctx)?;
    }
    let produced = behavior.produce(ctx).await;
    if let Some(status) = status {
        produced.map_err(|e| e.with_response_status(status))
    } else {
        produced
    }
}
