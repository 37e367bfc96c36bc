use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use http_body_util::Full;
use url::Url;

use crate::error::ApiError;
use crate::key_value::{KeyValue, encode_pairs};
use crate::transport::RequestTimeout;

/// Body of an [`ApiRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// Raw content with an explicit media type
    Bytes {
        /// Content
        content: Bytes,
        /// Media type sent as `Content-Type`
        content_type: String,
    },
    /// Serialized JSON document
    Json(Bytes),
    /// `application/x-www-form-urlencoded` fields
    Form(Vec<KeyValue>),
    /// `multipart/form-data` parts
    Multipart(FormDataContent),
}

impl RequestBody {
    /// `Content-Type` implied by the body.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Bytes { content_type, .. } => Some(content_type.clone()),
            Self::Json(_) => Some("application/json; charset=utf-8".to_owned()),
            Self::Form(_) => Some("application/x-www-form-urlencoded".to_owned()),
            Self::Multipart(content) => Some(content.content_type()),
        }
    }

    /// Encoded content.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::FormEncode`] if form fields cannot be encoded.
    pub fn encode(&self) -> Result<Bytes, ApiError> {
        Ok(match self {
            Self::Empty => Bytes::new(),
            Self::Bytes { content, .. } | Self::Json(content) => content.clone(),
            Self::Form(pairs) => Bytes::from(encode_pairs(pairs)?),
            Self::Multipart(content) => content.encode(),
        })
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Bytes { .. } => "bytes",
            Self::Json(_) => "json",
            Self::Form(_) => "form",
            Self::Multipart(_) => "multipart",
        }
    }
}

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq)]
pub enum FormDataPart {
    /// Plain text field
    Text {
        /// Field name
        name: String,
        /// Field value
        value: String,
    },
    /// File upload
    File {
        /// Field name
        name: String,
        /// File name announced to the server
        file_name: String,
        /// Media type of the file
        content_type: String,
        /// File content
        content: Bytes,
    },
}

/// `multipart/form-data` content with a random boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct FormDataContent {
    boundary: String,
    parts: Vec<FormDataPart>,
}

impl Default for FormDataContent {
    fn default() -> Self {
        Self::new()
    }
}

impl FormDataContent {
    /// Empty content with a fresh boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Empty content with the given boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// The boundary.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Parts in insertion order.
    #[must_use]
    pub fn parts(&self) -> &[FormDataPart] {
        &self.parts
    }

    /// Append a part.
    pub fn push(&mut self, part: FormDataPart) {
        self.parts.push(part);
    }

    /// `Content-Type` value including the boundary.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encode all parts.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        for part in &self.parts {
            out.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match part {
                FormDataPart::Text { name, value } => {
                    out.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            quote(name)
                        )
                        .as_bytes(),
                    );
                    out.put_slice(value.as_bytes());
                }
                FormDataPart::File {
                    name,
                    file_name,
                    content_type,
                    content,
                } => {
                    out.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {content_type}\r\n\r\n",
                            quote(name),
                            quote(file_name)
                        )
                        .as_bytes(),
                    );
                    out.put_slice(content);
                }
            }
            out.put_slice(b"\r\n");
        }
        out.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        out.freeze()
    }
}

fn quote(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Request under construction.
///
/// Behaviors mutate it in priority order; the transport receives the result
/// of [`into_http`](Self::into_http). The route is kept as a template until
/// then, so `{name}` placeholders can be replaced by later behaviors.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    base: Option<Url>,
    path: String,
    query: Vec<KeyValue>,
    headers: HeaderMap,
    body: RequestBody,
    timeout: Option<Duration>,
}

impl ApiRequest {
    /// Empty `GET` request resolved against `base`.
    #[must_use]
    pub fn new(base: Option<Url>) -> Self {
        Self {
            method: Method::GET,
            base,
            path: String::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Set the HTTP method.
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Base URL relative routes are resolved against.
    #[must_use]
    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    /// Replace the base URL.
    pub fn set_base(&mut self, base: Url) {
        self.base = Some(base);
    }

    /// Route template, relative or absolute.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Set the route template.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Replace every `{name}` placeholder (ASCII case-insensitive) with the
    /// percent-encoded `value`.
    ///
    /// Returns whether any placeholder was found.
    pub fn replace_path_param(&mut self, name: &str, value: &str) -> bool {
        let encoded = urlencoding::encode(value);
        let mut out = String::with_capacity(self.path.len());
        let mut rest = self.path.as_str();
        let mut replaced = false;

        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            let token = &rest[start + 1..start + len];
            out.push_str(&rest[..start]);
            if token.eq_ignore_ascii_case(name) {
                out.push_str(&encoded);
                replaced = true;
            } else {
                out.push_str(&rest[start..=start + len]);
            }
            rest = &rest[start + len + 1..];
        }
        out.push_str(rest);

        if replaced {
            self.path = out;
        }
        replaced
    }

    /// Query pairs in insertion order.
    #[must_use]
    pub fn query(&self) -> &[KeyValue] {
        &self.query
    }

    /// Append query pairs.
    pub fn add_query(&mut self, pairs: impl IntoIterator<Item = KeyValue>) {
        self.query.extend(pairs);
    }

    /// Headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Append a header, keeping existing values of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is not a valid header.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<(), ApiError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Body.
    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: RequestBody) {
        self.body = body;
    }

    /// Append urlencoded form fields.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Descriptor`] if the body already holds another kind
    /// of content.
    pub fn add_form_fields(
        &mut self,
        fields: impl IntoIterator<Item = KeyValue>,
    ) -> Result<(), ApiError> {
        match &mut self.body {
            RequestBody::Form(existing) => existing.extend(fields),
            RequestBody::Empty => self.body = RequestBody::Form(fields.into_iter().collect()),
            other => return Err(body_conflict("form", other)),
        }
        Ok(())
    }

    /// Append a multipart part.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Descriptor`] if the body already holds another kind
    /// of content.
    pub fn add_form_data_part(&mut self, part: FormDataPart) -> Result<(), ApiError> {
        match &mut self.body {
            RequestBody::Multipart(content) => content.push(part),
            RequestBody::Empty => {
                let mut content = FormDataContent::new();
                content.push(part);
                self.body = RequestBody::Multipart(content);
            }
            other => return Err(body_conflict("multipart", other)),
        }
        Ok(())
    }

    /// Per-request timeout overriding the transport default.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set the per-request timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Resolve the route against the base URL and append the query.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Config`] if the route is relative and no base is set
    /// - [`ApiError::InvalidUri`] if the route cannot be resolved
    pub fn url(&self) -> Result<Url, ApiError> {
        let mut url = match Url::parse(&self.path) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base.as_ref().ok_or_else(|| {
                    ApiError::Config(format!(
                        "route '{}' is relative and no http_host is configured",
                        self.path
                    ))
                })?;
                base.join(&self.path).map_err(|e| ApiError::InvalidUri {
                    url: format!("{base} + {}", self.path),
                    reason: e.to_string(),
                })?
            }
            Err(e) => {
                return Err(ApiError::InvalidUri {
                    url: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };

        if !self.query.is_empty() {
            let mut query = url.query_pairs_mut();
            for pair in &self.query {
                match &pair.value {
                    Some(value) => query.append_pair(&pair.key, value),
                    None => query.append_key_only(&pair.key),
                };
            }
        }
        Ok(url)
    }

    /// Convert into the request handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be resolved or the body cannot be
    /// encoded.
    pub fn into_http(self) -> Result<http::Request<Full<Bytes>>, ApiError> {
        let url = self.url()?;
        let uri = http::Uri::try_from(url.as_str()).map_err(|e| ApiError::InvalidUri {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let content = self.body.encode()?;
        let content_type = self.body.content_type();

        let mut request = http::Request::builder()
            .method(self.method)
            .uri(uri)
            .body(Full::new(content))?;

        *request.headers_mut() = self.headers;
        if let Some(content_type) = content_type
            && !request.headers().contains_key(CONTENT_TYPE)
        {
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
        }
        if let Some(timeout) = self.timeout {
            request.extensions_mut().insert(RequestTimeout(timeout));
        }
        Ok(request)
    }
}

fn body_conflict(wanted: &str, existing: &RequestBody) -> ApiError {
    ApiError::Descriptor(format!(
        "cannot add {wanted} content: request body already holds {} content",
        existing.kind_name()
    ))
}
