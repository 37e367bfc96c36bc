use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::behavior::{
    ActionBehavior, FilterBehavior, ParameterBehavior, ReturnBehavior, sort_by_priority,
};
use crate::context::RequestContext;
use crate::error::ApiError;
use crate::key_value::KeyValue;
use crate::returns::ApiReturn;
use crate::transport::CompletionMode;

/// Runtime value of one call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Structured or scalar value
    Value(Value),
    /// Pairs that are already flattened and must be sent as-is
    Pairs(Vec<KeyValue>),
    /// Raw content (uploads, pre-encoded bodies)
    Bytes(Bytes),
}

impl Argument {
    /// The `null` argument.
    #[must_use]
    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    /// Capture any `Serialize` value.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Json`] if the value cannot be represented as JSON.
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, ApiError> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    /// Whether the argument is `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// Text form of a scalar argument.
    ///
    /// Returns `None` for `null`, objects, arrays, pairs and non-UTF-8 bytes.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Value(Value::String(s)) => Some(s.clone()),
            Self::Value(v @ (Value::Number(_) | Value::Bool(_))) => Some(v.to_string()),
            Self::Bytes(bytes) => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Self::Value(_) | Self::Pairs(_) => None,
        }
    }
}

impl Default for Argument {
    fn default() -> Self {
        Self::null()
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Vec<KeyValue>> for Argument {
    fn from(pairs: Vec<KeyValue>) -> Self {
        Self::Pairs(pairs)
    }
}

impl From<Bytes> for Argument {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for Argument {
    fn from(value: bool) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<i32> for Argument {
    fn from(value: i32) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<i64> for Argument {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<u32> for Argument {
    fn from(value: u32) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<u64> for Argument {
    fn from(value: u64) -> Self {
        Self::Value(Value::from(value))
    }
}

/// One declared parameter of an action, with its value for the current call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    name: Arc<str>,
    value_type: &'static str,
    index: usize,
    value: Argument,
}

impl ParameterDescriptor {
    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared Rust type name.
    #[must_use]
    pub fn value_type(&self) -> &'static str {
        self.value_type
    }

    /// Position in the argument list.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Value bound for the current call (`null` on templates).
    #[must_use]
    pub fn value(&self) -> &Argument {
        &self.value
    }

    /// Copy of this descriptor carrying another value.
    #[must_use]
    pub fn with_value(&self, value: Argument) -> Self {
        Self {
            name: Arc::clone(&self.name),
            value_type: self.value_type,
            index: self.index,
            value,
        }
    }
}

/// Shape of the value an action returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Nothing; the body is ignored
    Unit,
    /// Body as UTF-8 text
    Text,
    /// Body as bytes
    Bytes,
    /// Body deserialized by a content-negotiated return behavior
    Model,
    /// The response itself, body unread
    RawResponse,
    /// The body as a stream
    Stream,
}

/// Declared return type of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnDescriptor {
    kind: ReturnKind,
    type_name: &'static str,
}

impl ReturnDescriptor {
    /// Descriptor of the return type `R`.
    #[must_use]
    pub fn of<R: ApiReturn>() -> Self {
        Self {
            kind: R::kind(),
            type_name: std::any::type_name::<R>(),
        }
    }

    /// Kind of the declared type.
    #[must_use]
    pub fn kind(&self) -> ReturnKind {
        self.kind
    }

    /// Declared type name, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The caller wants the response itself.
    #[must_use]
    pub fn is_raw_response(&self) -> bool {
        self.kind == ReturnKind::RawResponse
    }

    /// The caller wants the body as a stream.
    #[must_use]
    pub fn is_raw_stream(&self) -> bool {
        self.kind == ReturnKind::Stream
    }

    /// Raw kinds are produced without content negotiation.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.kind != ReturnKind::Model
    }

    /// Completion mode needed by this return type.
    #[must_use]
    pub fn completion_mode(&self) -> CompletionMode {
        if self.is_raw_response() || self.is_raw_stream() {
            CompletionMode::HeadersOnly
        } else {
            CompletionMode::FullBody
        }
    }
}

/// A request-building behavior attached to an action, its interface or one
/// of its parameters.
#[derive(Clone)]
pub enum ActionBinding {
    /// Attached to the action or its interface
    Action(Arc<dyn ActionBehavior>),
    /// Attached to the parameter at `index`
    Parameter {
        /// Parameter position
        index: usize,
        /// Behavior
        behavior: Arc<dyn ParameterBehavior>,
    },
}

impl ActionBinding {
    /// Priority of the underlying behavior.
    #[must_use]
    pub fn priority(&self) -> Option<i32> {
        match self {
            Self::Action(behavior) => behavior.priority(),
            Self::Parameter { behavior, .. } => behavior.priority(),
        }
    }

    /// Run the before-send hook.
    ///
    /// # Errors
    ///
    /// Propagates the behavior's error.
    pub async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        match self {
            Self::Action(behavior) => behavior.before_send(ctx).await,
            Self::Parameter { index, behavior } => {
                let descriptor = Arc::clone(ctx.descriptor_arc());
                let parameter = descriptor.parameters().get(*index).ok_or_else(|| {
                    ApiError::Descriptor(format!(
                        "action '{}' has no parameter at index {index}",
                        descriptor.name()
                    ))
                })?;
                behavior.before_send(ctx, parameter).await
            }
        }
    }
}

impl fmt::Debug for ActionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(behavior) => f.debug_tuple("Action").field(behavior).finish(),
            Self::Parameter { index, behavior } => f
                .debug_struct("Parameter")
                .field("index", index)
                .field("behavior", behavior)
                .finish(),
        }
    }
}

/// Immutable description of one remote operation.
///
/// Built once with [`ActionDescriptor::builder`] and shared by every call;
/// [`bind`](Self::bind) produces the per-call snapshot. Behavior lists are
/// stored already sorted by priority, so cloning is cheap.
#[derive(Clone)]
pub struct ActionDescriptor {
    name: Arc<str>,
    parameters: Vec<ParameterDescriptor>,
    returns: ReturnDescriptor,
    actions: Arc<[ActionBinding]>,
    filters: Arc<[Arc<dyn FilterBehavior>]>,
    return_behaviors: Arc<[Arc<dyn ReturnBehavior>]>,
}

impl ActionDescriptor {
    /// Start describing an action.
    pub fn builder(name: impl Into<String>) -> ActionDescriptorBuilder {
        ActionDescriptorBuilder::new(name.into())
    }

    /// Action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in positional order.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    /// Parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    /// Declared return type.
    #[must_use]
    pub fn returns(&self) -> &ReturnDescriptor {
        &self.returns
    }

    /// Request-building behaviors in execution order.
    #[must_use]
    pub fn actions(&self) -> &[ActionBinding] {
        &self.actions
    }

    /// Filter behaviors in before-hook order.
    #[must_use]
    pub fn filters(&self) -> &[Arc<dyn FilterBehavior>] {
        &self.filters
    }

    /// Explicit return behaviors in priority order.
    #[must_use]
    pub fn return_behaviors(&self) -> &[Arc<dyn ReturnBehavior>] {
        &self.return_behaviors
    }

    /// Snapshot of this descriptor with `arguments` bound positionally.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Descriptor`] if the number of arguments does not
    /// match the number of parameters.
    pub fn bind(&self, arguments: Vec<Argument>) -> Result<Self, ApiError> {
        if arguments.len() != self.parameters.len() {
            return Err(ApiError::Descriptor(format!(
                "action '{}' expects {} argument(s), got {}",
                self.name,
                self.parameters.len(),
                arguments.len()
            )));
        }

        let parameters = self
            .parameters
            .iter()
            .zip(arguments)
            .map(|(parameter, value)| parameter.with_value(value))
            .collect();

        Ok(Self {
            parameters,
            ..self.clone()
        })
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .field("actions", &self.actions.len())
            .field("filters", &self.filters.len())
            .field("return_behaviors", &self.return_behaviors.len())
            .finish()
    }
}

/// Builder of [`ActionDescriptor`].
///
/// Behaviors are collected in declaration order: interface behaviors first,
/// then action behaviors, then parameter behaviors in parameter order. That
/// order breaks ties between equal priorities.
#[must_use = "ActionDescriptorBuilder does nothing until .build() is called"]
pub struct ActionDescriptorBuilder {
    name: String,
    interface: Vec<ActionBinding>,
    method: Vec<ActionBinding>,
    parameters: Vec<ParameterDescriptor>,
    parameter_bindings: Vec<ActionBinding>,
    filters: Vec<Arc<dyn FilterBehavior>>,
    returns: ReturnDescriptor,
    return_behaviors: Vec<Arc<dyn ReturnBehavior>>,
    /// Error captured during building (deferred to `build()`)
    error: Option<ApiError>,
}

impl ActionDescriptorBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            interface: Vec::new(),
            method: Vec::new(),
            parameters: Vec::new(),
            parameter_bindings: Vec::new(),
            filters: Vec::new(),
            returns: ReturnDescriptor::of::<()>(),
            return_behaviors: Vec::new(),
            error: None,
        }
    }

    /// Attach a behavior declared on the API interface.
    pub fn interface_behavior(mut self, behavior: impl ActionBehavior + 'static) -> Self {
        self.interface.push(ActionBinding::Action(Arc::new(behavior)));
        self
    }

    /// Attach a behavior declared on the action.
    pub fn behavior(mut self, behavior: impl ActionBehavior + 'static) -> Self {
        self.method.push(ActionBinding::Action(Arc::new(behavior)));
        self
    }

    /// Attach a shared behavior declared on the action.
    pub fn shared_behavior(mut self, behavior: Arc<dyn ActionBehavior>) -> Self {
        self.method.push(ActionBinding::Action(behavior));
        self
    }

    /// Declare the next parameter, bound to `behavior`.
    pub fn parameter<T: ?Sized>(
        self,
        name: impl Into<String>,
        behavior: impl ParameterBehavior + 'static,
    ) -> Self {
        self.declare::<T>(name.into()).with(behavior)
    }

    /// Declare the next parameter without behavior.
    ///
    /// Such parameters are still visible to behaviors through
    /// [`RequestContext::argument`].
    pub fn unbound_parameter<T: ?Sized>(self, name: impl Into<String>) -> Self {
        self.declare::<T>(name.into())
    }

    /// Attach another behavior to the most recently declared parameter.
    pub fn with(mut self, behavior: impl ParameterBehavior + 'static) -> Self {
        match self.parameters.last() {
            Some(parameter) => {
                self.parameter_bindings.push(ActionBinding::Parameter {
                    index: parameter.index(),
                    behavior: Arc::new(behavior),
                });
            }
            None => {
                self.error.get_or_insert_with(|| {
                    ApiError::Descriptor(format!(
                        "action '{}': parameter behavior declared before any parameter",
                        self.name
                    ))
                });
            }
        }
        self
    }

    /// Attach a filter behavior.
    pub fn filter(mut self, filter: impl FilterBehavior + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Attach a shared filter behavior.
    pub fn shared_filter(mut self, filter: Arc<dyn FilterBehavior>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Declare the return type.
    pub fn returns<R: ApiReturn>(mut self) -> Self {
        self.returns = ReturnDescriptor::of::<R>();
        self
    }

    /// Attach an explicit return behavior.
    pub fn return_behavior(mut self, behavior: impl ReturnBehavior + 'static) -> Self {
        self.return_behaviors.push(Arc::new(behavior));
        self
    }

    fn declare<T: ?Sized>(mut self, name: String) -> Self {
        let index = self.parameters.len();
        self.parameters.push(ParameterDescriptor {
            name: Arc::from(name),
            value_type: std::any::type_name::<T>(),
            index,
            value: Argument::null(),
        });
        self
    }

    /// Validate and freeze the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Descriptor`] if the name is empty, a parameter
    /// name is repeated, or a behavior was attached before any parameter.
    pub fn build(self) -> Result<ActionDescriptor, ApiError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.name.trim().is_empty() {
            return Err(ApiError::Descriptor("action name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for parameter in &self.parameters {
            if !seen.insert(parameter.name()) {
                return Err(ApiError::Descriptor(format!(
                    "action '{}' declares parameter '{}' twice",
                    self.name,
                    parameter.name()
                )));
            }
        }

        let mut actions: Vec<ActionBinding> = self
            .interface
            .into_iter()
            .chain(self.method)
            .chain(self.parameter_bindings)
            .collect();
        sort_by_priority(&mut actions, ActionBinding::priority);

        let mut filters = self.filters;
        sort_by_priority(&mut filters, |f| f.priority());

        let mut return_behaviors = self.return_behaviors;
        sort_by_priority(&mut return_behaviors, |r| r.priority());

        Ok(ActionDescriptor {
            name: Arc::from(self.name),
            parameters: self.parameters,
            returns: self.returns,
            actions: actions.into(),
            filters: filters.into(),
            return_behaviors: return_behaviors.into(),
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::behavior::{HeaderParam, HttpMethod, PathParam};
    use crate::returns::{ByteStream, Model};
    use serde_json::json;

    fn template() -> ActionDescriptor {
        ActionDescriptor::builder("get_user")
            .behavior(HttpMethod::get("/users/{id}"))
            .parameter::<u64>("id", PathParam::new())
            .parameter::<str>("x_trace", HeaderParam::new())
            .returns::<Model<Value>>()
            .build()
            .unwrap()
    }

    #[test]
    fn bind_replaces_values_in_order() {
        let descriptor = template();
        let bound = descriptor
            .bind(vec![Argument::from(7_u64), Argument::from("abc")])
            .unwrap();

        assert_eq!(bound.name(), "get_user");
        assert_eq!(bound.parameters()[0].value(), &Argument::from(7_u64));
        assert_eq!(bound.parameters()[1].value(), &Argument::from("abc"));
        assert_eq!(bound.parameters()[1].index(), 1);
        assert_eq!(bound.parameters()[1].value_type(), "str");
        // the template is untouched
        assert!(descriptor.parameters()[0].value().is_null());
        assert_eq!(bound.actions().len(), descriptor.actions().len());
    }

    #[test]
    fn bind_rejects_argument_count_mismatch() {
        let err = template().bind(vec![Argument::from(1)]).unwrap_err();
        assert!(
            matches!(err, ApiError::Descriptor(ref msg) if msg.contains("expects 2")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn cloned_snapshots_are_independent() {
        let bound = template()
            .bind(vec![Argument::from(json!({"a": 1})), Argument::null()])
            .unwrap();
        let mut copy = bound.clone();
        copy.parameters[0] = copy.parameters[0].with_value(Argument::from(2));

        assert_eq!(bound.parameters()[0].value(), &Argument::from(json!({"a": 1})));
        assert_eq!(copy.parameters()[0].value(), &Argument::from(2));
    }

    #[test]
    fn duplicate_parameter_names_are_rejected() {
        let err = ActionDescriptor::builder("dup")
            .unbound_parameter::<u8>("a")
            .unbound_parameter::<u8>("a")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("twice"), "unexpected error: {err}");
    }

    #[test]
    fn parameter_behavior_without_parameter_is_rejected() {
        let err = ActionDescriptor::builder("broken")
            .with(PathParam::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ApiError::Descriptor(_)));
    }

    #[test]
    fn return_descriptor_classification() {
        let model = ReturnDescriptor::of::<Model<Value>>();
        assert!(!model.is_raw());
        assert_eq!(model.completion_mode(), CompletionMode::FullBody);

        let stream = ReturnDescriptor::of::<ByteStream>();
        assert!(stream.is_raw_stream());
        assert_eq!(stream.completion_mode(), CompletionMode::HeadersOnly);

        let text = ReturnDescriptor::of::<String>();
        assert!(text.is_raw());
        assert_eq!(text.completion_mode(), CompletionMode::FullBody);
    }

    #[test]
    fn scalar_arguments_have_text() {
        assert_eq!(Argument::from("a").to_text().as_deref(), Some("a"));
        assert_eq!(Argument::from(12).to_text().as_deref(), Some("12"));
        assert_eq!(Argument::from(true).to_text().as_deref(), Some("true"));
        assert_eq!(Argument::null().to_text(), None);
        assert_eq!(Argument::from(json!({"a": 1})).to_text(), None);
    }
}
