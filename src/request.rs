//! Request, response and interaction values

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use memchr::memmem;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::TapedeckError;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
    /// TRACE
    Trace,
    /// CONNECT
    Connect,
}

impl Method {
    /// Upper-case wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = TapedeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "delete" => Ok(Method::Delete),
            "patch" => Ok(Method::Patch),
            "head" => Ok(Method::Head),
            "options" => Ok(Method::Options),
            "trace" => Ok(Method::Trace),
            "connect" => Ok(Method::Connect),
            other => Err(TapedeckError::Other(format!("Unknown HTTP method: {other}"))),
        }
    }
}

/// Header multimap with case-insensitive names
///
/// Names keep the casing they were first inserted with; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, Vec<String>)>);

impl Headers {
    /// Create an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for a header name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|i| self.0[i].1.as_slice())
    }

    /// Replace all values of a header
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.0[i].1 = vec![value.into()],
            None => self.0.push((name, vec![value.into()])),
        }
    }

    /// Add a value to a header, keeping existing ones
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.0[i].1.push(value.into()),
            None => self.0.push((name, vec![value.into()])),
        }
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no headers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over names and their values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Lower-cased names with trimmed values, sorted by name
    #[must_use]
    pub fn normalized(&self) -> Vec<(String, Vec<String>)> {
        let mut normalized: Vec<_> = self
            .0
            .iter()
            .map(|(name, values)| {
                (
                    name.to_ascii_lowercase(),
                    values.iter().map(|v| v.trim().to_string()).collect(),
                )
            })
            .collect();
        normalized.sort_by(|a, b| a.0.cmp(&b.0));
        normalized
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    fn replace_in_values(&mut self, text: &str, replacement: &str) {
        for value in self.0.iter_mut().flat_map(|(_, values)| values.iter_mut()) {
            if value.contains(text) {
                *value = value.replace(text, replacement);
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// An outbound HTTP request as seen by an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Normalized URI
    pub uri: String,
    /// Request body, if any
    pub body: Option<Bytes>,
    /// Request headers
    pub headers: Headers,
}

impl Request {
    /// Create a request, normalizing the URI
    #[must_use]
    pub fn new(method: Method, uri: &str, body: Option<Bytes>, headers: Headers) -> Self {
        Self {
            method,
            uri: normalize_uri(uri),
            body,
            headers,
        }
    }

    /// Bodiless request without headers
    #[must_use]
    pub fn get(uri: &str) -> Self {
        Self::new(Method::Get, uri, None, Headers::new())
    }

    /// Parsed URI, if the stored URI is absolute
    #[must_use]
    pub fn parsed_uri(&self) -> Option<Url> {
        Url::parse(&self.uri).ok()
    }

    /// Lower-cased host of the URI
    #[must_use]
    pub fn host(&self) -> Option<String> {
        self.parsed_uri()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    }
}

/// Normalize a URI string
///
/// Absolute URIs are reserialized by the URL parser (lower-case scheme and host,
/// default port removed, empty path becomes `/`). Anything unparseable is kept trimmed.
fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim();
    Url::parse(trimmed).map_or_else(|_| trimmed.to_string(), String::from)
}

/// Response status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    /// Numeric status code
    pub code: u16,
    /// Reason phrase
    pub message: Option<String>,
}

impl ResponseStatus {
    /// Status without a reason phrase
    #[must_use]
    pub fn new(code: u16) -> Self {
        Self {
            code,
            message: None,
        }
    }
}

/// A response to replay or record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Status line
    pub status: ResponseStatus,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
    /// HTTP protocol version, e.g. `1.1`
    pub http_version: String,
}

impl Response {
    /// HTTP/1.1 response with the given status and body
    #[must_use]
    pub fn new(code: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            status: ResponseStatus::new(code),
            headers,
            body: body.into(),
            http_version: "1.1".to_string(),
        }
    }

    /// Body as UTF-8 text, if it is valid UTF-8
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// One completed request/response exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpInteraction {
    /// The request that was sent
    pub request: Request,
    /// The response that came back
    pub response: Response,
}

impl HttpInteraction {
    /// Pair a request with its response
    #[must_use]
    pub fn new(request: Request, response: Response) -> Self {
        Self { request, response }
    }

    /// Replace every occurrence of `text` with `replacement`
    ///
    /// Touches the request URI, body and header values, and the response status
    /// message, header values and body. Bodies are matched byte for byte, so
    /// binary bodies are filtered too. Empty `text` or `replacement` is a no-op.
    pub fn filter(&mut self, text: &str, replacement: &str) {
        if text.is_empty() || replacement.is_empty() {
            return;
        }

        if self.request.uri.contains(text) {
            self.request.uri = self.request.uri.replace(text, replacement);
        }
        if let Some(body) = &self.request.body {
            if let Some(filtered) = replace_in_bytes(body, text, replacement) {
                self.request.body = Some(filtered);
            }
        }
        self.request.headers.replace_in_values(text, replacement);

        if let Some(message) = &mut self.response.status.message {
            if message.contains(text) {
                *message = message.replace(text, replacement);
            }
        }
        self.response.headers.replace_in_values(text, replacement);
        if let Some(filtered) = replace_in_bytes(&self.response.body, text, replacement) {
            self.response.body = filtered;
        }
    }
}

/// `None` when `text` does not occur
fn replace_in_bytes(bytes: &Bytes, text: &str, replacement: &str) -> Option<Bytes> {
    let needle = text.as_bytes();
    let mut found = memmem::find_iter(bytes, needle).peekable();
    found.peek()?;

    let mut filtered = Vec::with_capacity(bytes.len());
    let mut copied = 0;
    for start in found {
        filtered.extend_from_slice(&bytes[copied..start]);
        filtered.extend_from_slice(replacement.as_bytes());
        copied = start + needle.len();
    }
    filtered.extend_from_slice(&bytes[copied..]);
    Some(Bytes::from(filtered))
}
