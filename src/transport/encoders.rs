//! Request encoders
//!
//! An encoder turns the method, URL, query parameters, body and headers of a
//! [`TransportRequest`](super::TransportRequest) into a [`PreparedRequest`]. Encoders are
//! looked up by name on the transport: `text`, `json` and `form` are always registered,
//! and additional ones may be added through the builder.
//!
//! Query parameters are URL-encoded the same way by every built-in encoder; only the
//! body handling differs.

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Map, Value};

use super::request::{PreparedRequest, RequestBody, build_url, flatten_params};
use crate::error::{Result, TransportError};

/// Name of the raw text/bytes encoder.
pub const TEXT: &str = "text";
/// Name of the JSON encoder.
pub const JSON: &str = "json";
/// Name of the form encoder.
pub const FORM: &str = "form";

/// Converts a request description into a sendable request.
pub trait RequestEncoder: Send + Sync {
    fn encode(
        &self,
        method: &Method,
        url: &str,
        params: &Map<String, Value>,
        data: &RequestBody,
        headers: &HeaderMap,
    ) -> Result<PreparedRequest>;
}

/// Pick the encoder name for a body when the caller did not name one.
pub fn infer_encoding(data: &RequestBody) -> &'static str {
    if data.is_raw() { TEXT } else { JSON }
}

fn prepare(
    method: &Method,
    url: &str,
    params: &Map<String, Value>,
    headers: &HeaderMap,
    body: Option<Vec<u8>>,
) -> Result<PreparedRequest> {
    Ok(PreparedRequest {
        method: method.clone(),
        url: build_url(url, params)?,
        headers: headers.clone(),
        body,
    })
}

/// Sends text or bytes verbatim. Performs no serialization.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextEncoder;

impl RequestEncoder for TextEncoder {
    fn encode(
        &self,
        method: &Method,
        url: &str,
        params: &Map<String, Value>,
        data: &RequestBody,
        headers: &HeaderMap,
    ) -> Result<PreparedRequest> {
        let body = match data {
            RequestBody::Text(s) => s.clone().into_bytes(),
            RequestBody::Bytes(b) => b.clone(),
            RequestBody::Empty => {
                return Err(TransportError::usage(
                    "text encoding requires a text or bytes body, got none",
                ));
            }
            RequestBody::Json(_) => {
                return Err(TransportError::usage(
                    "text encoding requires a text or bytes body, got structured data",
                ));
            }
        };
        prepare(method, url, params, headers, Some(body))
    }
}

/// Serializes structured data as JSON.
///
/// `Content-Type: application/json` is set whenever there is a body, replacing any
/// caller-supplied value, and never when the body is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl RequestEncoder for JsonEncoder {
    fn encode(
        &self,
        method: &Method,
        url: &str,
        params: &Map<String, Value>,
        data: &RequestBody,
        headers: &HeaderMap,
    ) -> Result<PreparedRequest> {
        let body = match data {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(serde_json::to_vec(value)?),
            RequestBody::Text(s) => Some(serde_json::to_vec(s)?),
            RequestBody::Bytes(_) => {
                return Err(TransportError::usage(
                    "json encoding cannot serialize a raw bytes body",
                ));
            }
        };
        let mut prepared = prepare(method, url, params, headers, body)?;
        if prepared.body.is_some() {
            prepared
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Ok(prepared)
    }
}

/// URL-encodes a key/value mapping as `application/x-www-form-urlencoded`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormEncoder;

impl RequestEncoder for FormEncoder {
    fn encode(
        &self,
        method: &Method,
        url: &str,
        params: &Map<String, Value>,
        data: &RequestBody,
        headers: &HeaderMap,
    ) -> Result<PreparedRequest> {
        let fields = match data {
            RequestBody::Json(Value::Object(fields)) => fields,
            _ => {
                return Err(TransportError::usage(
                    "form encoding requires a key/value mapping body",
                ));
            }
        };
        let body = flatten_params(fields)
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let mut prepared = prepare(method, url, params, headers, Some(body.into_bytes()))?;
        prepared.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn inference_prefers_text_for_raw_bodies() {
        assert_eq!(infer_encoding(&RequestBody::from("hi")), TEXT);
        assert_eq!(infer_encoding(&RequestBody::from(vec![0u8])), TEXT);
        assert_eq!(infer_encoding(&RequestBody::from(json!([1, 2]))), JSON);
        assert_eq!(infer_encoding(&RequestBody::Empty), JSON);
    }

    #[test]
    fn text_encoder_sends_verbatim() {
        let req = TextEncoder
            .encode(
                &Method::PUT,
                "https://h.example/x",
                &Map::new(),
                &RequestBody::from("raw payload"),
                &HeaderMap::new(),
            )
            .unwrap();
        assert_eq!(req.body_text(), Some("raw payload"));
        assert!(req.header("content-type").is_none());
    }

    #[test]
    fn text_encoder_rejects_structured_data() {
        let err = TextEncoder
            .encode(
                &Method::POST,
                "https://h.example/x",
                &Map::new(),
                &RequestBody::from(json!({"a": 1})),
                &HeaderMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Usage(_)));
    }

    #[test]
    fn json_body_round_trips() {
        let input = json!({"DATA_TYPE": "transfer", "items": [1, 2, {"k": "v"}]});
        let req = JsonEncoder
            .encode(
                &Method::POST,
                "https://h.example/x",
                &Map::new(),
                &RequestBody::from(input.clone()),
                &HeaderMap::new(),
            )
            .unwrap();
        assert_eq!(req.header("content-type"), Some("application/json"));
        let parsed: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(parsed, input);
    }

    #[test]
    fn json_without_body_sets_no_content_type() {
        let req = JsonEncoder
            .encode(
                &Method::GET,
                "https://h.example/x",
                &params(json!({"limit": 5})),
                &RequestBody::Empty,
                &HeaderMap::new(),
            )
            .unwrap();
        assert!(req.body.is_none());
        assert!(req.header("content-type").is_none());
        assert_eq!(req.url.query(), Some("limit=5"));
    }

    #[test]
    fn json_overrides_caller_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let req = JsonEncoder
            .encode(
                &Method::POST,
                "https://h.example/x",
                &Map::new(),
                &RequestBody::from(json!([1])),
                &headers,
            )
            .unwrap();
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn form_encodes_mapping() {
        let req = FormEncoder
            .encode(
                &Method::POST,
                "https://h.example/token",
                &Map::new(),
                &RequestBody::from(json!({"grant_type": "refresh_token", "scope": "a b"})),
                &HeaderMap::new(),
            )
            .unwrap();
        assert_eq!(
            req.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            req.body_text(),
            Some("grant_type=refresh_token&scope=a%20b")
        );
    }

    #[test]
    fn form_rejects_non_mapping() {
        for body in [
            RequestBody::from(json!(["a", "b"])),
            RequestBody::from("k=v"),
            RequestBody::Empty,
        ] {
            let err = FormEncoder
                .encode(
                    &Method::POST,
                    "https://h.example/x",
                    &Map::new(),
                    &body,
                    &HeaderMap::new(),
                )
                .unwrap_err();
            assert!(matches!(err, TransportError::Usage(_)));
        }
    }
}
