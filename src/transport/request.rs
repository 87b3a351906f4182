//! Request description and its encoded form.

use std::fmt;
use std::sync::Arc;

use reqwest::Method;
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::auth::Authorizer;
use crate::error::{Result, TransportError};

/// Body payload of a request, before encoding.
///
/// Raw variants (`Text`, `Bytes`) are sent verbatim by the `text` encoder; structured
/// data (`Json`) is serialized by the `json` encoder or, if it is an object, form-encoded
/// by the `form` encoder.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl RequestBody {
    /// Serialize any value into a structured body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// True for bodies that are already text or bytes.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Text(_) | Self::Bytes(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Map<String, Value>> for RequestBody {
    fn from(value: Map<String, Value>) -> Self {
        Self::Json(Value::Object(value))
    }
}

/// One logical request handed to [`Transport::request`](super::Transport::request).
#[derive(Clone)]
pub struct TransportRequest {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) query_params: Map<String, Value>,
    pub(crate) data: RequestBody,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) encoding: Option<String>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
    pub(crate) allow_redirects: bool,
    pub(crate) stream: bool,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query_params: Map::new(),
            data: RequestBody::Empty,
            headers: Vec::new(),
            encoding: None,
            authorizer: None,
            allow_redirects: true,
            stream: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add one query parameter. `null` values are dropped and arrays repeat the key.
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn query_params(mut self, params: Map<String, Value>) -> Self {
        self.query_params.extend(params);
        self
    }

    pub fn body(mut self, data: impl Into<RequestBody>) -> Self {
        self.data = data.into();
        self
    }

    /// Serialize `value` as the structured body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.data = RequestBody::json(value)?;
        Ok(self)
    }

    /// Add a header. Caller headers override the transport defaults.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Select an encoder by name (`text`, `json`, `form`, or a registered custom one).
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn allow_redirects(mut self, allow: bool) -> Self {
        self.allow_redirects = allow;
        self
    }

    /// Do not download the response body eagerly.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query_params", &self.query_params)
            .field("encoding", &self.encoding)
            .field("has_authorizer", &self.authorizer.is_some())
            .field("allow_redirects", &self.allow_redirects)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// A fully encoded request.
///
/// Built once per logical request; only the `Authorization` header changes between
/// attempts.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as UTF-8 text, when there is a body and it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Flatten a parameter mapping into ordered key/value string pairs.
///
/// `null` values are skipped, arrays produce one pair per element, nested objects are
/// sent as compact JSON.
pub(crate) fn flatten_params(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = scalar_to_string(item) {
                        pairs.push((key.clone(), s));
                    }
                }
            }
            other => {
                if let Some(s) = scalar_to_string(other) {
                    pairs.push((key.clone(), s));
                }
            }
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested => Some(nested.to_string()),
    }
}

/// Parse `url` and append the URL-encoded query parameters.
pub(crate) fn build_url(url: &str, params: &Map<String, Value>) -> Result<Url> {
    let mut url = Url::parse(url)
        .map_err(|e| TransportError::usage(format!("invalid request URL '{url}': {e}")))?;
    let pairs = flatten_params(params);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}
