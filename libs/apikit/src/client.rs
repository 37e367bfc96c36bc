use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::behavior::{FilterBehavior, ReturnBehavior};
use crate::config::HttpApiOptions;
use crate::descriptor::{ActionDescriptor, Argument};
use crate::error::ApiError;
use crate::invoker::ActionInvoker;
use crate::returns::ApiReturn;
use crate::transport::{HyperTransport, Transport, TransportConfig};

/// Named actions of one remote API behind a shared invoker.
///
/// Cloning is cheap; clones share the transport and its connection pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    invoker: Arc<ActionInvoker>,
    actions: Arc<HashMap<String, ActionDescriptor>>,
}

impl ApiClient {
    /// Start configuring a client for the API described by `options`.
    pub fn builder(options: HttpApiOptions) -> ApiClientBuilder {
        ApiClientBuilder::new(options)
    }

    /// Call the action registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Descriptor`] for an unknown action, otherwise the
    /// fault of the call.
    pub async fn invoke<R: ApiReturn>(
        &self,
        name: &str,
        arguments: Vec<Argument>,
    ) -> Result<R, ApiError> {
        self.invoke_with_cancellation(name, arguments, CancellationToken::new())
            .await
    }

    /// Call the action registered as `name`, aborting when `cancellation`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Descriptor`] for an unknown action, otherwise the
    /// fault of the call.
    pub async fn invoke_with_cancellation<R: ApiReturn>(
        &self,
        name: &str,
        arguments: Vec<Argument>,
        cancellation: CancellationToken,
    ) -> Result<R, ApiError> {
        let descriptor = self
            .actions
            .get(name)
            .ok_or_else(|| ApiError::Descriptor(format!("unknown action '{name}'")))?;
        self.invoker
            .invoke_as(descriptor, arguments, cancellation)
            .await
    }

    /// Descriptor registered as `name`.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.get(name)
    }

    /// Names of the registered actions, in no particular order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// The shared invoker.
    #[must_use]
    pub fn invoker(&self) -> &ActionInvoker {
        &self.invoker
    }
}

/// Builder of [`ApiClient`].
#[must_use]
pub struct ApiClientBuilder {
    options: HttpApiOptions,
    transport: Option<Arc<dyn Transport>>,
    transport_config: TransportConfig,
    actions: Vec<ActionDescriptor>,
    global_filters: Vec<Arc<dyn FilterBehavior>>,
    default_returns: Option<Vec<Arc<dyn ReturnBehavior>>>,
}

impl ApiClientBuilder {
    fn new(options: HttpApiOptions) -> Self {
        Self {
            options,
            transport: None,
            transport_config: TransportConfig::default(),
            actions: Vec::new(),
            global_filters: Vec::new(),
            default_returns: None,
        }
    }

    /// Send through `transport` instead of a [`HyperTransport`].
    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    /// Send through a transport shared with other clients.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Settings of the [`HyperTransport`] built when no transport is given.
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    /// Register an action under its name.
    pub fn action(mut self, descriptor: ActionDescriptor) -> Self {
        self.actions.push(descriptor);
        self
    }

    /// Filter applied to every action.
    pub fn global_filter(self, filter: impl FilterBehavior + 'static) -> Self {
        self.shared_global_filter(Arc::new(filter))
    }

    /// Shared filter applied to every action.
    pub fn shared_global_filter(mut self, filter: Arc<dyn FilterBehavior>) -> Self {
        self.global_filters.push(filter);
        self
    }

    /// Replace the default return behaviors.
    pub fn default_returns(mut self, behaviors: Vec<Arc<dyn ReturnBehavior>>) -> Self {
        self.default_returns = Some(behaviors);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Config`] if the options are invalid or the default
    ///   transport cannot be created
    /// - [`ApiError::Descriptor`] if two actions share a name
    pub fn build(self) -> Result<ApiClient, ApiError> {
        self.options.validate()?;

        let mut actions = HashMap::with_capacity(self.actions.len());
        for descriptor in self.actions {
            if actions.contains_key(descriptor.name()) {
                return Err(ApiError::Descriptor(format!(
                    "action '{}' registered twice",
                    descriptor.name()
                )));
            }
            actions.insert(descriptor.name().to_owned(), descriptor);
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(self.transport_config)?),
        };

        let mut invoker = ActionInvoker::new(transport, self.options);
        for filter in self.global_filters {
            invoker = invoker.with_global_filter(filter);
        }
        if let Some(defaults) = self.default_returns {
            invoker = invoker.with_default_returns(defaults);
        }

        tracing::debug!(actions = actions.len(), "api client built");
        Ok(ApiClient {
            invoker: Arc::new(invoker),
            actions: Arc::new(actions),
        })
    }
}
