use anyhow::Context;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthSession;
use crate::cache::ResponseCache;
use crate::error::Result;
use crate::models::{
    Failure, Operation, RequestBody, RequestSpec, ResponseBody, ResponseEnvelope,
};

/// How a request body ended up on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// No body sent
    None,
    /// Body serialized as JSON
    Json,
    /// Body sent unmodified
    PassThrough,
}

/// Builds and sends API requests on behalf of an [`AuthSession`]
pub struct RequestDispatcher {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Cache of mutating-call responses
    cache: Arc<ResponseCache>,
}

impl RequestDispatcher {
    /// Create a new dispatcher with bounded connect and request timeouts (seconds)
    pub fn new(cache: Arc<ResponseCache>, connect_timeout: u64, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, cache })
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Send a request, refreshing the session's token first unless the
    /// request targets an auth endpoint.
    ///
    /// HTTP and transport failures come back inside the envelope; only token
    /// and refresh problems are returned as errors.
    pub async fn send(&self, session: &AuthSession, spec: &RequestSpec) -> Result<ResponseEnvelope> {
        if !spec.is_auth_endpoint() {
            session.ensure_fresh(session.refresh_margin()).await?;
        }

        let token = session.access_token().await;
        let url = resolve_url(session.host(), &spec.path, spec.query.as_deref());
        let envelope = self.execute(&url, token.as_deref(), spec).await;

        if spec.method.is_mutating() {
            self.cache.put(spec.method, &url, envelope.clone());
        }

        Ok(envelope)
    }

    /// Look up the cached response for a request without sending anything
    pub fn send_cached(&self, session: &AuthSession, spec: &RequestSpec) -> Option<ResponseEnvelope> {
        let url = resolve_url(session.host(), &spec.path, spec.query.as_deref());
        let cached = self.cache.get(spec.method, &url);
        if cached.is_some() {
            tracing::debug!(method = %spec.method, url = %url, "Using cached response");
        }
        cached
    }

    /// Send without the refresh check and without caching.
    /// Used by the session for the auth endpoints.
    pub async fn dispatch_raw(
        &self,
        host: &str,
        token: Option<&str>,
        spec: &RequestSpec,
    ) -> ResponseEnvelope {
        let url = resolve_url(host, &spec.path, spec.query.as_deref());
        self.execute(&url, token, spec).await
    }

    /// Send a resource operation, mapped to its HTTP verb
    pub async fn request(
        &self,
        session: &AuthSession,
        operation: Operation,
        path: &str,
        body: Option<Value>,
    ) -> Result<ResponseEnvelope> {
        let mut spec = RequestSpec::for_operation(operation, path);
        if let Some(body) = body {
            spec = spec.body(body);
        }
        self.send(session, &spec).await
    }

    /// Return the first object of a collection, creating one if it is empty
    pub async fn get_or_post(
        &self,
        session: &AuthSession,
        path: &str,
        body: Value,
    ) -> Result<ResponseEnvelope> {
        let existing = self.send(session, &RequestSpec::get(path)).await?;

        if !existing.is_success() {
            return Ok(existing);
        }

        if existing.body.is_empty() {
            tracing::info!("Creating a new object at {}", path);
            return self.send(session, &RequestSpec::post(path, body)).await;
        }

        tracing::info!("Found existing object at {}", path);
        let first = existing
            .json()
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned();

        Ok(match first {
            Some(item) => ResponseEnvelope {
                body: ResponseBody::Json(item),
                error: None,
            },
            None => existing,
        })
    }

    async fn execute(&self, url: &str, token: Option<&str>, spec: &RequestSpec) -> ResponseEnvelope {
        let headers = build_headers(token, spec.extra_headers.as_deref());
        let (body, encoding) = encode_body(spec);

        tracing::debug!(
            method = %spec.method,
            url = %url,
            encoding = ?encoding,
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(spec.method.to_reqwest(), url)
            .headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let error_kind = error_kind(&e);
                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                return ResponseEnvelope::transport_failure(format!("{} ({})", e, error_kind));
            }
        };

        let status = response.status();
        tracing::debug!(status = %status, "Received HTTP response");

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "Failed to read response body");
                return ResponseEnvelope::transport_failure(format!(
                    "failed to read response body: {} ({})",
                    e,
                    error_kind(&e)
                ));
            }
        };

        let envelope = ResponseEnvelope::from_text(text);
        if status.is_success() {
            return envelope;
        }

        let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
        tracing::warn!(
            status = status.as_u16(),
            url = %url,
            "HTTP request failed with error response"
        );
        envelope.with_failure(Failure::http(status.as_u16(), reason))
    }
}

/// Join host and path, trimming one trailing slash from the host, and append
/// the percent-encoded query string
pub fn resolve_url(host: &str, path: &str, query: Option<&[(String, String)]>) -> String {
    let base = host.strip_suffix('/').unwrap_or(host);
    let mut url = format!("{}{}", base, path);

    if let Some(params) = query.filter(|params| !params.is_empty()) {
        let pairs: Vec<String> = params
            .iter()
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect();
        url.push('?');
        url.push_str(&pairs.join("&"));
    }

    url
}

/// Default JSON content type, the JWT when held, then caller overrides
pub fn build_headers(token: Option<&str>, extra: Option<&[(String, String)]>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        match HeaderValue::from_str(&format!("JWT {}", token)) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(e) => tracing::warn!("Access token is not a valid header value: {}", e),
        }
    }

    for (name, value) in extra.unwrap_or_default() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid extra header"),
        }
    }

    headers
}

/// Encode the body according to the request method.
///
/// GET and DELETE never carry a body. Mutating calls serialize JSON bodies
/// unless `raw_body` is set; opaque bytes always pass through unmodified.
pub fn encode_body(spec: &RequestSpec) -> (Option<Bytes>, BodyEncoding) {
    if !spec.method.is_mutating() {
        if spec.body.is_some() {
            tracing::debug!(method = %spec.method, "Dropping body from request");
        }
        return (None, BodyEncoding::None);
    }

    match &spec.body {
        None => (None, BodyEncoding::None),
        Some(RequestBody::Bytes(bytes)) => {
            if !spec.raw_body {
                tracing::debug!("Body is not JSON-serializable, sending it unmodified");
            }
            (Some(bytes.clone()), BodyEncoding::PassThrough)
        }
        Some(RequestBody::Json(Value::String(text))) if spec.raw_body => {
            (Some(Bytes::from(text.clone())), BodyEncoding::PassThrough)
        }
        Some(RequestBody::Json(value)) if spec.raw_body => {
            (Some(Bytes::from(value.to_string())), BodyEncoding::PassThrough)
        }
        Some(RequestBody::Json(value)) => match serde_json::to_vec(value) {
            Ok(bytes) => (Some(Bytes::from(bytes)), BodyEncoding::Json),
            Err(e) => {
                tracing::warn!("Failed to serialize body, sending it unmodified: {}", e);
                (Some(Bytes::from(value.to_string())), BodyEncoding::PassThrough)
            }
        },
    }
}

/// Categorize a reqwest error for logging
fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_builder() {
        "invalid_request"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}
