//! Request descriptors.
//!
//! [`Endpoint`] only requires a method and a path. Every other capability is
//! an optional method whose default means "not provided":
//!
//! | capability      | default                         |
//! |-----------------|---------------------------------|
//! | [`Endpoint::headers`]   | no request headers      |
//! | [`Endpoint::query`]     | no query string         |
//! | [`Endpoint::body`]      | no raw body             |
//! | [`Endpoint::json_body`] | no JSON body            |
//! | [`Endpoint::validate`]  | always valid            |
//!
//! A raw body takes precedence over a JSON body.

use std::borrow::Cow;

use bytes::Bytes;
use reqwest::{header::HeaderMap, Method};
use serde::Serialize;

use crate::error::BoxError;

pub trait Endpoint {
    fn method(&self) -> Method;

    /// Path relative to the client base URL, or an absolute URL.
    fn path(&self) -> Cow<'_, str>;

    fn headers(&self) -> Option<HeaderMap> {
        None
    }

    /// Query pairs; encoded sorted by key.
    fn query(&self) -> Option<Vec<(String, String)>> {
        None
    }

    fn body(&self) -> Option<Bytes> {
        None
    }

    /// JSON payload; sets `Content-Type: application/json` unless the
    /// request headers already carry a content type.
    fn json_body(&self) -> Option<JsonBody> {
        None
    }

    /// Runs before any I/O. A failure is never retried.
    fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Serialized JSON payload. Encoding errors surface when the request is built.
#[derive(Debug)]
pub struct JsonBody(Result<Vec<u8>, serde_json::Error>);

impl JsonBody {
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Self {
        Self(serde_json::to_vec(value))
    }

    pub(crate) fn into_bytes(self) -> Result<Bytes, serde_json::Error> {
        self.0.map(Bytes::from)
    }
}

/// Endpoint built from plain values.
#[derive(Clone, Debug)]
pub struct PlainRequest {
    method: Method,
    path: String,
    headers: Option<HeaderMap>,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl PlainRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: None,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn query_pair(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl Endpoint for PlainRequest {
    fn method(&self) -> Method {
        self.method.clone()
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.path)
    }

    fn headers(&self) -> Option<HeaderMap> {
        self.headers.clone()
    }

    fn query(&self) -> Option<Vec<(String, String)>> {
        (!self.query.is_empty()).then(|| self.query.clone())
    }

    fn body(&self) -> Option<Bytes> {
        self.body.clone()
    }
}
