//! Transport adapter: turns a [`RequestSpec`] into an HTTP call.
//!
//! The adapter sits between the coordinator and a raw [`HttpClient`]. It:
//!
//! 1. Resolves the credential (explicit per-call token first, then the ambient provider)
//! 2. Merges headers over a default `Content-Type: application/json`
//! 3. Injects `Authorization: Bearer <token>` last, so it replaces any caller-supplied
//!    `Authorization` header whenever a credential is present
//! 4. Unwraps error responses into the server payload when there is one
//!
//! It holds no per-call state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::credentials::CredentialProvider;
use crate::error::ApiError;

/// The HTTP intent produced by an endpoint resolver for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// Path relative to the adapter's base URL.
    pub url: String,
    pub method: Method,
    pub body: Option<Value>,
    /// Query parameters appended to the final URL.
    pub params: Vec<(String, String)>,
    /// Caller headers, applied over the defaults.
    pub headers: Vec<(String, String)>,
    /// Per-call bearer token; takes precedence over the ambient credential.
    pub token: Option<String>,
    body_error: Option<ApiError>,
}

impl RequestSpec {
    /// Creates a request for `url` with the given method.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            body: None,
            params: Vec::new(),
            headers: Vec::new(),
            token: None,
            body_error: None,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    #[must_use]
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    #[must_use]
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Sets a JSON body.
    ///
    /// If `body` fails to serialize, the request is never sent and
    /// [`RequestSpec::check`] reports [`ApiError::Decode`].
    #[must_use]
    pub fn body(mut self, body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => {
                self.body = Some(body);
                self.body_error = None;
            }
            Err(e) => {
                self.body = None;
                self.body_error = Some(ApiError::from(e));
            }
        }
        self
    }

    /// Checks that the request was built without errors.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if the body could not be serialized.
    pub fn check(&self) -> Result<(), ApiError> {
        match &self.body_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// A fully materialized request handed to an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

/// A response as seen by the adapter: status and decoded body.
///
/// Empty bodies decode to `null`; bodies that are not JSON are kept as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    #[must_use]
    pub const fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes raw body text the way the adapter expects it.
    #[must_use]
    pub fn decode_body(text: &str) -> Value {
        if text.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    }
}

/// The raw HTTP contract consumed by the adapter.
///
/// Implementations return `Ok` for every response that arrived, whatever its
/// status; `Err` is reserved for calls that produced no response.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ApiError>>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the underlying client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    #[must_use]
    pub const fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestClient {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ApiError>> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            match serde_json::to_vec(body) {
                Ok(bytes) => builder = builder.body(bytes),
                Err(e) => return futures::future::ready(Err(ApiError::from(e))).boxed(),
            }
        }

        async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            Ok(HttpResponse::new(status, HttpResponse::decode_body(&text)))
        }
        .boxed()
    }
}

/// Wraps an [`HttpClient`] behind the uniform `send(spec, credential)` signature.
#[derive(Clone)]
pub struct TransportAdapter {
    base_url: String,
    client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
}

impl fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TransportAdapter {
    pub fn new(
        base_url: impl Into<String>,
        client: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            credentials,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends `spec`, resolving to the response body on a 2xx status.
    ///
    /// `credential` overrides both `spec.token` and the ambient provider. An
    /// explicitly empty token disables authentication for the call.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Transport`] with the server payload for non-2xx responses with a body
    /// - [`ApiError::Http`] for non-2xx responses without one
    /// - [`ApiError::Network`] when no response arrived
    /// - [`ApiError::InvalidRequest`] for an unparseable URL or header
    /// - [`ApiError::Decode`] if the body failed to serialize
    pub async fn send(&self, spec: &RequestSpec, credential: Option<&str>) -> Result<Value, ApiError> {
        spec.check()?;

        let token = match credential.or(spec.token.as_deref()) {
            Some(explicit) => Some(explicit.to_string()),
            None => self.credentials.token(),
        }
        .filter(|token| !token.is_empty());

        let request = HttpRequest {
            url: self.resolve_url(spec)?,
            method: spec.method.clone(),
            headers: build_headers(&spec.headers, token.as_deref())?,
            body: spec.body.clone(),
        };

        debug!(
            method = %request.method,
            url = %request.url,
            authenticated = token.is_some(),
            "sending request"
        );

        let response = self.client.execute(request).await.inspect_err(|e| {
            warn!(method = %spec.method, url = %spec.url, error = %e, "transport failure");
        })?;

        if response.is_success() {
            Ok(response.body)
        } else {
            warn!(method = %spec.method, url = %spec.url, status = response.status, "request rejected");
            Err(unwrap_failure(response))
        }
    }

    fn resolve_url(&self, spec: &RequestSpec) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url, spec.url);
        let mut url =
            Url::parse(&raw).map_err(|e| ApiError::InvalidRequest(format!("{raw}: {e}")))?;
        if !spec.params.is_empty() {
            url.query_pairs_mut().extend_pairs(spec.params.iter());
        }
        Ok(url)
    }
}

/// Builds the outgoing header set.
///
/// Order of application: default `Content-Type`, then caller headers, then the
/// bearer token. Later writes win, so a present credential always replaces a
/// caller-supplied `Authorization` header.
///
/// # Errors
///
/// Returns [`ApiError::InvalidRequest`] if a header name or value is malformed.
pub fn build_headers(caller: &[(String, String)], token: Option<&str>) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in caller {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("header '{name}': {e}")))?;
        headers.insert(name, value);
    }

    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ApiError::InvalidRequest(format!("bearer token: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

/// Maps a non-success response to the error surfaced to callers.
fn unwrap_failure(response: HttpResponse) -> ApiError {
    let has_payload = match &response.body {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    };
    if has_payload {
        ApiError::Transport {
            status: response.status,
            payload: response.body,
        }
    } else {
        ApiError::Http {
            status: response.status,
        }
    }
}
