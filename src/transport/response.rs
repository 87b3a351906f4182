//! HTTP response returned by the transport.

use std::fmt;
use std::io::{Cursor, Read};

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, TransportError};

/// Response body, either fully read or still attached to the connection.
pub enum ResponseBody {
    Buffered(Vec<u8>),
    Streaming(reqwest::blocking::Response),
}

/// A response of any status. Non-2xx statuses are not errors at this level.
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<Url>,
    body: ResponseBody,
}

impl HttpResponse {
    /// Build a response whose body has already been read.
    pub fn buffered(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            url: None,
            body: ResponseBody::Buffered(body.into()),
        }
    }

    /// Wrap a live reqwest response without reading its body.
    pub fn streaming(response: reqwest::blocking::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            url: Some(response.url().clone()),
            body: ResponseBody::Streaming(response),
        }
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Final URL, after redirects.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Streaming(_))
    }

    /// Buffered body bytes. `None` for streaming responses.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Buffered(b) => Some(b),
            ResponseBody::Streaming(_) => None,
        }
    }

    /// Buffered body decoded as UTF-8, lossily.
    pub fn text(&self) -> Option<String> {
        self.body_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Decode the buffered body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.body_bytes().ok_or_else(|| {
            TransportError::usage("cannot decode a streaming response as JSON; use into_reader")
        })?;
        serde_json::from_slice(bytes).map_err(|e| {
            TransportError::Parse(format!(
                "response body (status {}) is not valid JSON: {e}",
                self.status.as_u16()
            ))
        })
    }

    /// Decode the buffered body as JSON, if it is JSON at all.
    pub fn json_value(&self) -> Option<Value> {
        self.body_bytes()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    /// Consume the response and read its body incrementally.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        match self.body {
            ResponseBody::Buffered(b) => Box::new(Cursor::new(b)),
            ResponseBody::Streaming(r) => Box::new(r),
        }
    }

    /// Turn a non-2xx response into [`TransportError::Api`].
    ///
    /// The error code comes from a JSON `code` field (default `"Error"`), the message from
    /// `message` or `detail`, falling back to the raw body text.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        let body = self.json_value();
        let field = |name: &str| {
            body.as_ref()
                .and_then(|b| b.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let code = field("code").unwrap_or_else(|| "Error".to_string());
        let message = field("message")
            .or_else(|| field("detail"))
            .or_else(|| self.text().filter(|t| !t.is_empty()))
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string()
            });
        Err(TransportError::Api {
            status: self.status.as_u16(),
            code,
            message,
            body,
        })
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("streaming", &self.is_streaming())
            .field("body_len", &self.body_bytes().map(<[u8]>::len))
            .finish()
    }
}
