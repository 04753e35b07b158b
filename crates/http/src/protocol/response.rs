//! The response data model handed to the serializer.

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Serialize;

use crate::codec::encoding::ContentEncoding;

/// A lazily produced sequence of body chunks, written with chunked
/// transfer encoding.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// The body attached to a [`Response`].
///
/// Exactly one of fixed-length, streaming or no body governs the wire format.
pub enum ResponseBody {
    Empty,
    /// In-memory bytes, sent with `Content-Length`.
    Full(Bytes),
    /// An in-memory file: served with MIME guessing, disposition and byte
    /// ranges.
    File { filename: String, data: Bytes, preview: bool },
    /// Lazy chunk sequence, sent with `Transfer-Encoding: chunked`.
    Stream(BodyStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Full(data) => f.debug_tuple("Full").field(&data.len()).finish(),
            ResponseBody::File { filename, data, preview } => f
                .debug_struct("File")
                .field("filename", filename)
                .field("len", &data.len())
                .field("preview", preview)
                .finish(),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// `SameSite` cookie attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// One structured `Set-Cookie` directive, assembled at serialization time.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: false,
            same_site: SameSite::Lax,
            expires: None,
            max_age: None,
        }
    }

    /// Renders the `Set-Cookie` header value.
    pub(crate) fn render(&self) -> String {
        let mut s = format!("{}={}", self.name, self.value);
        if !self.path.is_empty() {
            s.push_str("; Path=");
            s.push_str(&self.path);
        }
        // SameSite=None requires Secure.
        if self.secure || self.same_site == SameSite::None {
            s.push_str("; Secure");
        }
        if self.http_only {
            s.push_str("; HttpOnly");
        }
        if let Some(domain) = &self.domain {
            s.push_str("; Domain=");
            s.push_str(domain);
        }
        match self.same_site {
            SameSite::Lax => {}
            SameSite::Strict => s.push_str("; SameSite=Strict"),
            SameSite::None => s.push_str("; SameSite=None"),
        }
        if let Some(expires) = &self.expires {
            s.push_str("; Expires=");
            s.push_str(&expires.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        }
        if let Some(max_age) = self.max_age {
            s.push_str(&format!("; Max-Age={max_age}"));
        }
        s
    }
}

/// A response under construction, consumed exactly once by the serializer.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    body: ResponseBody,
    forced_encoding: Option<(ContentEncoding, u32)>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), cookies: Vec::new(), body: ResponseBody::Empty, forced_encoding: None }
    }

    /// A bare status response whose body is the canonical reason phrase.
    pub fn status(status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("");
        let mut response = Self::new(status);
        if !reason.is_empty() {
            response.body = ResponseBody::Full(Bytes::from_static(reason.as_bytes()));
            response.headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        }
        response
    }

    pub fn text(body: impl Into<String>) -> Self {
        let mut response = Self::new(StatusCode::OK);
        response.headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response.body = ResponseBody::Full(Bytes::from(body.into()));
        response
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        let mut response = Self::new(StatusCode::OK);
        response.headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        response.body = ResponseBody::Full(Bytes::from(body));
        Ok(response)
    }

    pub fn redirect(location: &str) -> Self {
        let mut response = Self::new(StatusCode::FOUND);
        if let Ok(value) = HeaderValue::from_str(location) {
            response.headers.insert(http::header::LOCATION, value);
        }
        response
    }

    /// An in-memory file. `preview` asks for inline disposition when the MIME
    /// type is previewable.
    pub fn file(filename: impl Into<String>, data: Bytes, preview: bool) -> Self {
        let mut response = Self::new(StatusCode::OK);
        response.body = ResponseBody::File { filename: filename.into(), data, preview };
        response
    }

    /// A streaming body, written with chunked transfer encoding.
    pub fn stream(stream: BodyStream) -> Self {
        let mut response = Self::new(StatusCode::OK);
        response.body = ResponseBody::Stream(stream);
        response
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Pins a compression scheme and level, bypassing negotiation and the
    /// minimum-length threshold.
    pub fn with_encoding(mut self, encoding: ContentEncoding, level: u32) -> Self {
        self.forced_encoding = Some((encoding, level));
        self
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub(crate) fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Empty)
    }

    pub(crate) fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    pub(crate) fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub(crate) fn forced_encoding(&self) -> Option<(ContentEncoding, u32)> {
        self.forced_encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_render_defaults() {
        let cookie = Cookie::new("sid", "abc");
        assert_eq!(cookie.render(), "sid=abc; Path=/");
    }

    #[test]
    fn cookie_render_full() {
        let mut cookie = Cookie::new("sid", "abc");
        cookie.http_only = true;
        cookie.domain = Some("example.com".to_string());
        cookie.same_site = SameSite::None;
        cookie.max_age = Some(3600);
        let rendered = cookie.render();
        assert_eq!(rendered, "sid=abc; Path=/; Secure; HttpOnly; Domain=example.com; SameSite=None; Max-Age=3600");
    }

    #[test]
    fn status_response_has_reason_body() {
        let response = Response::status(StatusCode::NOT_FOUND);
        match response.body() {
            ResponseBody::Full(data) => assert_eq!(&data[..], b"Not Found"),
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
