//! The parsed HTTP request data model.
//!
//! A [`Request`] is created per exchange by the request parser, enriched by
//! the router (path params) and the body parsers, and dropped when the
//! exchange ends.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method, Version};

/// Body framing negotiated from the request headers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes.
    Length(u64),
    /// Payload using chunked transfer encoding.
    Chunked,
    /// No body.
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

/// One byte range from a `Range: bytes=...` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ByteRange {
    /// `A-B`: inclusive bounds.
    Bounded(u64, u64),
    /// `A-`: open end.
    From(u64),
    /// `-N`: last N bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Resolves against a resource of `total` bytes into inclusive bounds.
    /// Returns `None` when the range lies outside the resource.
    pub fn resolve(&self, total: u64) -> Option<(u64, u64)> {
        if total == 0 {
            return None;
        }
        match *self {
            ByteRange::Bounded(start, end) => {
                if start > end || start >= total {
                    None
                } else {
                    Some((start, end.min(total - 1)))
                }
            }
            ByteRange::From(start) => {
                if start >= total {
                    None
                } else {
                    Some((start, total - 1))
                }
            }
            ByteRange::Suffix(n) => {
                if n == 0 {
                    None
                } else {
                    Some((total.saturating_sub(n), total - 1))
                }
            }
        }
    }

}

/// One uploaded file from a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub name: String,
    pub filename: String,
    pub data: Bytes,
}

/// A parsed HTTP request.
///
/// Invariant: `path` never contains the query string; `full_path` always does
/// when one was present on the wire.
#[derive(Debug)]
pub struct Request {
    method: Method,
    websocket: bool,
    version: Version,
    path: String,
    full_path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    params: HashMap<String, String>,
    cookies: HashMap<String, String>,
    ranges: Vec<ByteRange>,
    client_ip: String,
    payload: PayloadSize,
    body: Option<Bytes>,
    json: Option<serde_json::Value>,
    form: HashMap<String, String>,
    files: Vec<FilePart>,
}

impl Request {
    /// Assembles a request. Normally done by the request parser; public so
    /// that services can be exercised without a socket.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: Method,
        websocket: bool,
        version: Version,
        path: String,
        full_path: String,
        query: HashMap<String, String>,
        headers: HeaderMap,
        cookies: HashMap<String, String>,
        ranges: Vec<ByteRange>,
        client_ip: String,
        payload: PayloadSize,
    ) -> Self {
        Self {
            method,
            websocket,
            version,
            path,
            full_path,
            query,
            headers,
            params: HashMap::new(),
            cookies,
            ranges,
            client_ip,
            payload,
            body: None,
            json: None,
            form: HashMap::new(),
            files: Vec::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// True once the request carried `Upgrade: websocket`; websocket routes
    /// match on this flag rather than the HTTP method.
    pub fn is_websocket(&self) -> bool {
        self.websocket
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Percent-decoded path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The original request target, query string included.
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive single-header lookup as a string slice.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path parameters, populated by the router after matching.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// Discards parsed byte ranges; used by routes that opt out of range
    /// service.
    pub fn clear_ranges(&mut self) {
        self.ranges.clear();
    }

    /// Client address, after `X-Real-IP`/`X-Forwarded-For` overrides.
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn payload(&self) -> PayloadSize {
        self.payload
    }

    /// Raw body bytes; `None` until received.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    pub fn form(&self) -> &HashMap<String, String> {
        &self.form
    }

    pub fn files(&self) -> &[FilePart] {
        &self.files
    }

    pub(crate) fn append_body(&mut self, chunk: &[u8]) {
        match &mut self.body {
            Some(body) => {
                let mut buf = Vec::with_capacity(body.len() + chunk.len());
                buf.extend_from_slice(body);
                buf.extend_from_slice(chunk);
                self.body = Some(Bytes::from(buf));
            }
            None => self.body = Some(Bytes::copy_from_slice(chunk)),
        }
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = Some(body);
    }

    pub(crate) fn set_json(&mut self, json: serde_json::Value) {
        self.json = Some(json);
    }

    pub(crate) fn set_form(&mut self, form: HashMap<String, String>) {
        self.form = form;
    }

    pub(crate) fn set_files(&mut self, files: Vec<FilePart>) {
        self.files = files;
    }

    /// Whether keep-alive is permitted by the negotiated version and the
    /// client's `Connection` header (server-side limits are applied by the
    /// connection).
    pub fn allows_keep_alive(&self) -> bool {
        let connection = self.header("connection").unwrap_or("");
        match self.version {
            Version::HTTP_11 => !connection.eq_ignore_ascii_case("close"),
            Version::HTTP_10 => connection.eq_ignore_ascii_case("keep-alive"),
            _ => false,
        }
    }
}
