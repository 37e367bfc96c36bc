use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::HeaderMap;
use http::header::{AUTHORIZATION, PROXY_AUTHORIZATION};

use super::FilterBehavior;
use crate::context::{RequestContext, ResponseContext};
use crate::error::ApiError;
use crate::properties::PropertyKey;

/// Tracing target of exchange logs.
pub const LOG_TARGET: &str = "apikit::logging";

/// Where [`LoggingFilter`] keeps the message between its two hooks.
pub const LOG_MESSAGE: PropertyKey<LogMessage> = PropertyKey::new("apikit.logging.message");

/// Characters of a body kept in a log message.
const BODY_LOG_LIMIT: usize = 4096;

/// Summary of one exchange, completed in two steps.
#[derive(Debug, Clone)]
pub struct LogMessage {
    /// Action name
    pub action: String,
    /// When the request hook ran
    pub started_at: Instant,
    /// Request method
    pub method: String,
    /// Request URL (the route when it could not be resolved)
    pub url: String,
    /// Request headers, sensitive values redacted
    pub request_headers: String,
    /// Request body, when request logging is on
    pub request_body: Option<String>,
    /// Response status
    pub status: Option<u16>,
    /// Response headers, sensitive values redacted
    pub response_headers: Option<String>,
    /// Response body; `...` when it was not buffered
    pub response_body: Option<String>,
    /// Time between the request hook and the response hook
    pub elapsed: Option<Duration>,
    /// Fault of the call
    pub error: Option<String>,
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[REQUEST] {} {}", self.method, self.url)?;
        f.write_str(&self.request_headers)?;
        if let Some(body) = &self.request_body {
            writeln!(f, "{body}")?;
        }
        match self.status {
            Some(status) => writeln!(f, "[RESPONSE] {status}")?,
            None => writeln!(f, "[RESPONSE] <none>")?,
        }
        if let Some(headers) = &self.response_headers {
            f.write_str(headers)?;
        }
        if let Some(body) = &self.response_body {
            writeln!(f, "{body}")?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "[ERROR] {error}")?;
        }
        if let Some(elapsed) = self.elapsed {
            write!(f, "[ELAPSED] {}ms", elapsed.as_millis())?;
        }
        Ok(())
    }
}

fn format_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let sensitive =
                value.is_sensitive() || name == AUTHORIZATION || name == PROXY_AUTHORIZATION;
            let value = if sensitive {
                "***"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            format!("{name}: {value}\n")
        })
        .collect()
}

fn truncate(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_LOG_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

/// Logs every exchange of the actions it is attached to.
///
/// Runs last among filters so the request it records is final. Enabled only
/// when [`HttpApiOptions::use_logging`](crate::HttpApiOptions::use_logging)
/// is set. Successful exchanges are logged at `INFO`, faulted ones at
/// `ERROR`, under the `apikit::logging` target.
#[derive(Debug, Clone, Copy)]
pub struct LoggingFilter {
    log_request: bool,
    log_response: bool,
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingFilter {
    /// Log request and response bodies.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log_request: true,
            log_response: true,
        }
    }

    /// Whether request bodies are logged.
    #[must_use]
    pub fn log_request(mut self, enabled: bool) -> Self {
        self.log_request = enabled;
        self
    }

    /// Whether response bodies are logged.
    #[must_use]
    pub fn log_response(mut self, enabled: bool) -> Self {
        self.log_response = enabled;
        self
    }
}

#[async_trait]
impl FilterBehavior for LoggingFilter {
    fn priority(&self) -> Option<i32> {
        Some(i32::MAX)
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        if !ctx.options().use_logging {
            return Ok(());
        }

        let request = ctx.request();
        let url = request
            .url()
            .map_or_else(|_| request.path().to_owned(), |url| url.to_string());
        let request_body = if self.log_request {
            Some(truncate(&request.body().encode()?))
        } else {
            None
        };

        let message = LogMessage {
            action: ctx.action_name().to_owned(),
            started_at: Instant::now(),
            method: request.method().to_string(),
            url,
            request_headers: format_headers(request.headers()),
            request_body,
            status: None,
            response_headers: None,
            response_body: None,
            elapsed: None,
            error: None,
        };
        ctx.properties_mut().insert(LOG_MESSAGE, message);
        Ok(())
    }

    async fn on_response(&self, ctx: &mut ResponseContext) {
        let Some(mut message) = ctx.properties_mut().remove(LOG_MESSAGE) else {
            return;
        };

        message.elapsed = Some(message.started_at.elapsed());
        if let Some(response) = ctx.response() {
            message.status = Some(response.status().as_u16());
            message.response_headers = Some(format_headers(response.headers()));
            if self.log_response {
                message.response_body = Some(
                    response
                        .buffered_body()
                        .map_or_else(|| "...".to_owned(), |body| truncate(body.as_ref())),
                );
            }
        }
        message.error = ctx.error().map(ToString::to_string);

        let elapsed_ms = message
            .elapsed
            .map_or(0, |e| u64::try_from(e.as_millis()).unwrap_or(u64::MAX));
        if message.error.is_some() {
            tracing::error!(
                target: LOG_TARGET,
                action = %message.action,
                status = message.status,
                elapsed_ms,
                "{message}"
            );
        } else {
            tracing::info!(
                target: LOG_TARGET,
                action = %message.action,
                status = message.status,
                elapsed_ms,
                "{message}"
            );
        }
    }
}
