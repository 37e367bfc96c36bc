//! Built-in request-building behaviors.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use serde_json::Value;
use url::Url;

use super::{ActionBehavior, ParameterBehavior};
use crate::context::RequestContext;
use crate::descriptor::{Argument, ParameterDescriptor};
use crate::error::ApiError;
use crate::key_value::{KeyValue, KeyValueSerializer, KeyValueSerializerOptions};
use crate::request::{FormDataPart, RequestBody};

/// Priority of [`HttpHost`], ahead of everything else.
pub const HOST_PRIORITY: i32 = i32::MIN;

/// Priority of [`HttpMethod`], right after the host.
pub const METHOD_PRIORITY: i32 = i32::MIN + 1;

/// Overrides the base URL of the API for one action or interface.
#[derive(Debug, Clone)]
pub struct HttpHost {
    host: Url,
}

impl HttpHost {
    /// Use `host` as the base URL.
    #[must_use]
    pub fn new(host: Url) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ActionBehavior for HttpHost {
    fn priority(&self) -> Option<i32> {
        Some(HOST_PRIORITY)
    }

    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        ctx.request_mut().set_base(self.host.clone());
        Ok(())
    }
}

/// Sets the HTTP method and, optionally, the route template.
#[derive(Debug, Clone)]
pub struct HttpMethod {
    method: Method,
    route: Option<String>,
    priority: i32,
}

impl HttpMethod {
    /// `method` with an optional route.
    #[must_use]
    pub fn new(method: Method, route: Option<String>) -> Self {
        Self {
            method,
            route,
            priority: METHOD_PRIORITY,
        }
    }

    /// `GET route`
    #[must_use]
    pub fn get(route: impl Into<String>) -> Self {
        Self::new(Method::GET, Some(route.into()))
    }

    /// `POST route`
    #[must_use]
    pub fn post(route: impl Into<String>) -> Self {
        Self::new(Method::POST, Some(route.into()))
    }

    /// `PUT route`
    #[must_use]
    pub fn put(route: impl Into<String>) -> Self {
        Self::new(Method::PUT, Some(route.into()))
    }

    /// `PATCH route`
    #[must_use]
    pub fn patch(route: impl Into<String>) -> Self {
        Self::new(Method::PATCH, Some(route.into()))
    }

    /// `DELETE route`
    #[must_use]
    pub fn delete(route: impl Into<String>) -> Self {
        Self::new(Method::DELETE, Some(route.into()))
    }

    /// `HEAD route`
    #[must_use]
    pub fn head(route: impl Into<String>) -> Self {
        Self::new(Method::HEAD, Some(route.into()))
    }

    /// Run at `priority` instead of right after the host.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl ActionBehavior for HttpMethod {
    fn priority(&self) -> Option<i32> {
        Some(self.priority)
    }

    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let request = ctx.request_mut();
        request.set_method(self.method.clone());
        if let Some(route) = &self.route {
            request.set_path(route.clone());
        }
        Ok(())
    }
}

fn key_for<'a>(alias: Option<&'a str>, parameter: &'a ParameterDescriptor) -> &'a str {
    alias.unwrap_or_else(|| parameter.name())
}

/// Replaces the `{name}` placeholder of the route with the argument.
///
/// `null` becomes an empty segment. Objects and arrays are rejected.
#[derive(Debug, Clone, Default)]
pub struct PathParam {
    alias: Option<String>,
}

impl PathParam {
    /// Placeholder named after the parameter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder with another name.
    pub fn named(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
        }
    }
}

#[async_trait]
impl ParameterBehavior for PathParam {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let name = key_for(self.alias.as_deref(), parameter);
        let value = if parameter.value().is_null() {
            String::new()
        } else {
            parameter
                .value()
                .to_text()
                .ok_or_else(|| ApiError::argument(name, "path values must be scalars"))?
        };

        if ctx.request_mut().replace_path_param(name, &value) {
            Ok(())
        } else {
            Err(ApiError::argument(
                name,
                format!("route '{}' has no {{{name}}} placeholder", ctx.request().path()),
            ))
        }
    }
}

/// Adds the argument to the query string through the key-value serializer.
#[derive(Debug, Clone, Default)]
pub struct QueryParam {
    alias: Option<String>,
    options: Option<KeyValueSerializerOptions>,
}

impl QueryParam {
    /// Query key named after the parameter, serializer options of the API.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another root key.
    pub fn named(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            options: None,
        }
    }

    /// Use these serializer options instead of the API's.
    #[must_use]
    pub fn with_options(mut self, options: KeyValueSerializerOptions) -> Self {
        self.options = Some(options);
        self
    }
}

#[async_trait]
impl ParameterBehavior for QueryParam {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let key = key_for(self.alias.as_deref(), parameter);
        let options = self.options.as_ref().unwrap_or(&ctx.options().key_value);
        let pairs = KeyValueSerializer::serialize_argument(key, parameter.value(), options)?;
        ctx.request_mut().add_query(pairs);
        Ok(())
    }
}

/// Sends the argument as a header. `null` sends nothing.
///
/// The header name defaults to the parameter name with `_` replaced by `-`.
#[derive(Debug, Clone, Default)]
pub struct HeaderParam {
    alias: Option<String>,
}

impl HeaderParam {
    /// Header named after the parameter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Header with an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            alias: Some(name.into()),
        }
    }
}

#[async_trait]
impl ParameterBehavior for HeaderParam {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let name = self
            .alias
            .clone()
            .unwrap_or_else(|| parameter.name().replace('_', "-"));
        if parameter.value().is_null() {
            return Ok(());
        }
        let value = parameter
            .value()
            .to_text()
            .ok_or_else(|| ApiError::argument(parameter.name(), "header values must be scalars"))?;
        ctx.request_mut().append_header(&name, &value)
    }
}

/// Sends a constant header.
#[derive(Debug, Clone)]
pub struct StaticHeader {
    name: String,
    value: String,
}

impl StaticHeader {
    /// `name: value`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl ActionBehavior for StaticHeader {
    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        ctx.request_mut().append_header(&self.name, &self.value)
    }
}

/// Sends the argument as a JSON body.
///
/// Byte arguments are sent as already serialized JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody;

impl JsonBody {
    /// JSON body behavior.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ParameterBehavior for JsonBody {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let content = match parameter.value() {
            Argument::Value(value) => Bytes::from(serde_json::to_vec(value)?),
            Argument::Bytes(bytes) => bytes.clone(),
            Argument::Pairs(pairs) => {
                let object: serde_json::Map<String, Value> = pairs
                    .iter()
                    .map(|kv| {
                        let value = kv.value.clone().map_or(Value::Null, Value::String);
                        (kv.key.clone(), value)
                    })
                    .collect();
                Bytes::from(serde_json::to_vec(&object)?)
            }
        };
        ctx.request_mut().set_body(RequestBody::Json(content));
        Ok(())
    }
}

/// Sends the argument unchanged with a fixed content type.
#[derive(Debug, Clone)]
pub struct RawBody {
    content_type: String,
}

impl RawBody {
    /// Raw body sent as `content_type`.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }
}

#[async_trait]
impl ParameterBehavior for RawBody {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let content = match parameter.value() {
            Argument::Bytes(bytes) => bytes.clone(),
            Argument::Value(Value::String(text)) => Bytes::from(text.clone()),
            _ => {
                return Err(ApiError::argument(
                    parameter.name(),
                    "raw bodies take bytes or a string",
                ));
            }
        };
        ctx.request_mut().set_body(RequestBody::Bytes {
            content,
            content_type: self.content_type.clone(),
        });
        Ok(())
    }
}

/// Adds the argument to a url-encoded form body through the key-value
/// serializer.
#[derive(Debug, Clone, Default)]
pub struct FormBody {
    options: Option<KeyValueSerializerOptions>,
}

impl FormBody {
    /// Form fields with the API's serializer options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use these serializer options instead of the API's.
    #[must_use]
    pub fn with_options(mut self, options: KeyValueSerializerOptions) -> Self {
        self.options = Some(options);
        self
    }
}

#[async_trait]
impl ParameterBehavior for FormBody {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let options = self.options.as_ref().unwrap_or(&ctx.options().key_value);
        let pairs =
            KeyValueSerializer::serialize_argument(parameter.name(), parameter.value(), options)?;
        ctx.request_mut().add_form_fields(pairs)
    }
}

/// Adds a constant field to a url-encoded form body.
#[derive(Debug, Clone)]
pub struct FormField {
    field: KeyValue,
}

impl FormField {
    /// `name=value`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: KeyValue::new(name, value),
        }
    }
}

#[async_trait]
impl ActionBehavior for FormField {
    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        ctx.request_mut().add_form_fields([self.field.clone()])
    }
}

/// Adds a constant text part to a multipart body.
#[derive(Debug, Clone)]
pub struct FormDataText {
    name: String,
    value: String,
}

impl FormDataText {
    /// Text part `name` with `value`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl ActionBehavior for FormDataText {
    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        ctx.request_mut().add_form_data_part(FormDataPart::Text {
            name: self.name.clone(),
            value: self.value.clone(),
        })
    }
}

/// Adds the argument to a multipart body.
///
/// Byte arguments become a file part; anything else is flattened through
/// the key-value serializer into text parts.
#[derive(Debug, Clone)]
pub struct FormDataParam {
    file_name: Option<String>,
    content_type: String,
}

impl Default for FormDataParam {
    fn default() -> Self {
        Self {
            file_name: None,
            content_type: "application/octet-stream".to_owned(),
        }
    }
}

impl FormDataParam {
    /// Multipart parameter; files are sent as `application/octet-stream`
    /// named after the parameter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// File part with an explicit file name and media type.
    pub fn file(file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            content_type: content_type.into(),
        }
    }
}

#[async_trait]
impl ParameterBehavior for FormDataParam {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        if let Argument::Bytes(content) = parameter.value() {
            return ctx.request_mut().add_form_data_part(FormDataPart::File {
                name: parameter.name().to_owned(),
                file_name: self
                    .file_name
                    .clone()
                    .unwrap_or_else(|| parameter.name().to_owned()),
                content_type: self.content_type.clone(),
                content: content.clone(),
            });
        }

        let pairs = KeyValueSerializer::serialize_argument(
            parameter.name(),
            parameter.value(),
            &ctx.options().key_value,
        )?;
        for pair in pairs {
            ctx.request_mut().add_form_data_part(FormDataPart::Text {
                name: pair.key,
                value: pair.value.unwrap_or_default(),
            })?;
        }
        Ok(())
    }
}

/// Fixed timeout for the action.
#[derive(Debug, Clone, Copy)]
pub struct Timeout(pub Duration);

#[async_trait]
impl ActionBehavior for Timeout {
    async fn before_send(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        ctx.request_mut().set_timeout(self.0);
        Ok(())
    }
}

/// Timeout taken from the argument: milliseconds as a number, or a
/// human-readable duration such as `"1500ms"` or `"2s"`. `null` keeps the
/// default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutParam;

impl TimeoutParam {
    /// Timeout parameter behavior.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ParameterBehavior for TimeoutParam {
    async fn before_send(
        &self,
        ctx: &mut RequestContext,
        parameter: &ParameterDescriptor,
    ) -> Result<(), ApiError> {
        let timeout = match parameter.value() {
            Argument::Value(Value::Null) => return Ok(()),
            Argument::Value(Value::Number(ms)) => ms.as_u64().map(Duration::from_millis),
            Argument::Value(Value::String(text)) => humantime::parse_duration(text).ok(),
            _ => None,
        }
        .ok_or_else(|| {
            ApiError::argument(
                parameter.name(),
                "timeout must be non-negative milliseconds or a duration string",
            )
        })?;
        ctx.request_mut().set_timeout(timeout);
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::HttpApiOptions;
    use crate::descriptor::ActionDescriptor;
    use crate::key_value::KeyNamingStyle;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    async fn build(descriptor: ActionDescriptor, args: Vec<Argument>) -> RequestContext {
        let options = HttpApiOptions::with_host(Url::parse("http://api.local/").unwrap());
        let bound = descriptor.bind(args).unwrap();
        let mut ctx = RequestContext::new(bound, Arc::new(options), CancellationToken::new());
        let actions = ctx.descriptor().actions().to_vec();
        for action in &actions {
            action.before_send(&mut ctx).await.unwrap();
        }
        ctx
    }

    #[tokio::test]
    async fn method_route_path_and_query() {
        let descriptor = ActionDescriptor::builder("list")
            .parameter::<u64>("org", PathParam::new())
            .parameter::<Value>("filter", QueryParam::new())
            // declared last, still runs first
            .behavior(HttpMethod::get("orgs/{org}/users"))
            .build()
            .unwrap();

        let ctx = build(
            descriptor,
            vec![Argument::from(7), Argument::from(json!({"role": "admin", "ids": [1, 2]}))],
        )
        .await;

        assert_eq!(
            ctx.request().url().unwrap().as_str(),
            "http://api.local/orgs/7/users?role=admin&ids=1&ids=2"
        );
    }

    #[tokio::test]
    async fn query_options_override() {
        let descriptor = ActionDescriptor::builder("search")
            .behavior(HttpMethod::get("search"))
            .parameter::<Value>(
                "f",
                QueryParam::new()
                    .with_options(KeyValueSerializerOptions::with_style(
                        KeyNamingStyle::FullNameWithRoot,
                    )),
            )
            .build()
            .unwrap();

        let ctx = build(descriptor, vec![Argument::from(json!({"a": {"b": 1}}))]).await;
        assert_eq!(ctx.request().url().unwrap().query(), Some("f.a.b=1"));
    }

    #[tokio::test]
    async fn missing_placeholder_is_an_argument_error() {
        let descriptor = ActionDescriptor::builder("get")
            .behavior(HttpMethod::get("items"))
            .parameter::<u64>("id", PathParam::new())
            .build()
            .unwrap()
            .bind(vec![Argument::from(1)])
            .unwrap();
        let mut ctx = RequestContext::new(
            descriptor,
            Arc::new(HttpApiOptions::default()),
            CancellationToken::new(),
        );
        let actions = ctx.descriptor().actions().to_vec();
        actions[0].before_send(&mut ctx).await.unwrap();
        let err = actions[1].before_send(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ApiError::Argument { ref name, .. } if name == "id"), "{err}");
    }

    #[tokio::test]
    async fn headers_from_arguments_and_constants() {
        let descriptor = ActionDescriptor::builder("h")
            .behavior(StaticHeader::new("x-api-version", "2"))
            .parameter::<str>("x_request_id", HeaderParam::new())
            .parameter::<str>("tenant", HeaderParam::named("x-tenant"))
            .parameter::<Option<String>>("skipped", HeaderParam::new())
            .build()
            .unwrap();

        let ctx = build(
            descriptor,
            vec![Argument::from("r-1"), Argument::from("acme"), Argument::null()],
        )
        .await;
        let headers = ctx.request().headers();
        assert_eq!(headers["x-api-version"], "2");
        assert_eq!(headers["x-request-id"], "r-1");
        assert_eq!(headers["x-tenant"], "acme");
        assert!(!headers.contains_key("skipped"));
    }

    #[tokio::test]
    async fn json_body() {
        let descriptor = ActionDescriptor::builder("create")
            .behavior(HttpMethod::post("items"))
            .parameter::<Value>("item", JsonBody::new())
            .build()
            .unwrap();

        let ctx = build(descriptor, vec![Argument::from(json!({"name": "x"}))]).await;
        assert_eq!(ctx.request().method(), Method::POST);
        assert_eq!(
            ctx.request().body(),
            &RequestBody::Json(Bytes::from_static(br#"{"name":"x"}"#))
        );
    }

    #[tokio::test]
    async fn form_fields_from_constants_and_arguments() {
        let descriptor = ActionDescriptor::builder("token")
            .behavior(HttpMethod::post("token"))
            .behavior(FormField::new("grant_type", "client_credentials"))
            .parameter::<Value>("credentials", FormBody::new())
            .build()
            .unwrap();

        let ctx = build(
            descriptor,
            vec![Argument::from(json!({"client_id": "id", "scope": null}))],
        )
        .await;
        assert_eq!(
            ctx.request().body().encode().unwrap().as_ref(),
            b"grant_type=client_credentials&client_id=id&scope="
        );
    }

    #[tokio::test]
    async fn multipart_text_and_file_parts() {
        let descriptor = ActionDescriptor::builder("upload")
            .behavior(HttpMethod::post("files"))
            .behavior(FormDataText::new("kind", "report"))
            .parameter::<Bytes>("file", FormDataParam::file("r.csv", "text/csv"))
            .parameter::<Value>("meta", FormDataParam::new())
            .build()
            .unwrap();

        let ctx = build(
            descriptor,
            vec![
                Argument::from(Bytes::from_static(b"a,b")),
                Argument::from(json!({"owner": "ann"})),
            ],
        )
        .await;

        let RequestBody::Multipart(content) = ctx.request().body() else {
            panic!("expected multipart body, got {:?}", ctx.request().body());
        };
        assert_eq!(
            content.parts(),
            &[
                FormDataPart::Text {
                    name: "kind".into(),
                    value: "report".into()
                },
                FormDataPart::File {
                    name: "file".into(),
                    file_name: "r.csv".into(),
                    content_type: "text/csv".into(),
                    content: Bytes::from_static(b"a,b"),
                },
                FormDataPart::Text {
                    name: "owner".into(),
                    value: "ann".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn timeout_from_argument() {
        let descriptor = ActionDescriptor::builder("t")
            .parameter::<u64>("timeout", TimeoutParam::new())
            .build()
            .unwrap();

        let ctx = build(descriptor.clone(), vec![Argument::from(1500)]).await;
        assert_eq!(ctx.request().timeout(), Some(Duration::from_millis(1500)));

        let ctx = build(descriptor.clone(), vec![Argument::from("2s")]).await;
        assert_eq!(ctx.request().timeout(), Some(Duration::from_secs(2)));

        let ctx = build(descriptor, vec![Argument::null()]).await;
        assert_eq!(ctx.request().timeout(), None);
    }

    #[tokio::test]
    async fn host_override_runs_first() {
        let descriptor = ActionDescriptor::builder("h")
            .behavior(HttpMethod::get("ping"))
            .interface_behavior(HttpHost::new(Url::parse("https://other.local/base/").unwrap()))
            .build()
            .unwrap();

        let ctx = build(descriptor, vec![]).await;
        assert_eq!(
            ctx.request().url().unwrap().as_str(),
            "https://other.local/base/ping"
        );
    }
}
