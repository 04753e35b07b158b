//! Request line and header parsing.
//!
//! Reads the header block off the byte stream up to the empty-line delimiter,
//! parses it with `httparse`, and lifts the result into a [`Request`],
//! applying the well-known header side effects (cookies, client-IP override,
//! byte ranges, websocket upgrade detection) and working out the body framing
//! from `Content-Length`/`Transfer-Encoding`.

use std::collections::HashMap;
use std::mem::MaybeUninit;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};
use httparse::Status;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::protocol::{ByteRange, ParseError, PayloadSize, Request};
use crate::stream::ByteStream;
use crate::utils::{ensure, percent_decode_str};

/// Maximum number of headers allowed in a request.
pub const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEAD_DELIMITER: &[u8] = b"\r\n\r\n";

/// Reads and parses one request head.
///
/// `timeout` is chosen by the caller: the keep-alive idle timeout before the
/// 2nd+ request of a connection, the request timeout otherwise. `peer_ip` is
/// the socket peer, overridden by `X-Real-IP`/`X-Forwarded-For`.
pub async fn parse_request_line_and_headers<S>(
    stream: &mut ByteStream<S>,
    timeout: Duration,
    peer_ip: &str,
) -> Result<Request, ParseError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = stream.read_until(HEAD_DELIMITER, timeout, MAX_HEADER_BYTES).await?;
    trace!(head_size = head.len(), "read request head");

    let mut parsed = httparse::Request::new(&mut []);
    let mut header_slots: [MaybeUninit<httparse::Header>; MAX_HEADER_NUM] =
        [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];

    let status = parsed.parse_with_uninit_headers(&head, &mut header_slots).map_err(|e| match e {
        httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        e => ParseError::invalid_header(e.to_string()),
    })?;

    // We read up to the blank line, so a partial parse means the head itself
    // was malformed.
    let Status::Complete(_) = status else {
        return Err(ParseError::invalid_request_line("incomplete request head"));
    };

    let method = parsed
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or_else(|| ParseError::invalid_request_line("unrecognized method"))?;

    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        v => return Err(ParseError::InvalidVersion(v)),
    };

    let target = parsed.path.ok_or_else(|| ParseError::invalid_request_line("missing target"))?;
    let (raw_path, raw_query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };
    let path = percent_decode_str(raw_path, false);
    let query = raw_query.map(parse_query).unwrap_or_default();

    let header_count = parsed.headers.len();
    ensure!(header_count <= MAX_HEADER_NUM, ParseError::too_many_headers(header_count));

    let mut headers = HeaderMap::with_capacity(header_count);
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| ParseError::invalid_header(e.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| ParseError::invalid_header(e.to_string()))?;
        headers.append(name, value);
    }

    let cookies = headers
        .get(http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(parse_cookies)
        .unwrap_or_default();

    let client_ip = headers
        .get("x-real-ip")
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| peer_ip.to_string());

    let ranges = headers
        .get(http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(parse_ranges)
        .unwrap_or_default();

    let websocket = headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    let payload = parse_payload(&headers)?;

    Ok(Request::new(
        method,
        websocket,
        version,
        path,
        target.to_string(),
        query,
        headers,
        cookies,
        ranges,
        client_ip,
        payload,
    ))
}

/// Decodes a query string into key/value pairs, last-wins on duplicates.
fn parse_query(raw: &str) -> HashMap<String, String> {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(raw) {
        Ok(pairs) => pairs.into_iter().collect(),
        // Malformed query strings degrade to best-effort manual decoding.
        Err(_) => raw
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (percent_decode_str(k, true), percent_decode_str(v, true)),
                None => (percent_decode_str(pair, true), String::new()),
            })
            .collect(),
    }
}

fn parse_cookies(value: &str) -> HashMap<String, String> {
    value
        .split(';')
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}

/// Parses a `Range` header value. Malformed headers yield an empty list
/// rather than an error.
fn parse_ranges(value: &str) -> Vec<ByteRange> {
    let Some(spec) = value.strip_prefix("bytes=") else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let Some((start, end)) = part.split_once('-') else {
            return Vec::new();
        };
        let range = match (start.is_empty(), end.is_empty()) {
            (true, false) => end.parse().map(ByteRange::Suffix),
            (false, true) => start.parse().map(ByteRange::From),
            (false, false) => start
                .parse()
                .and_then(|s| end.parse().map(|e| ByteRange::Bounded(s, e))),
            (true, true) => return Vec::new(),
        };
        match range {
            Ok(range) => ranges.push(range),
            Err(_) => return Vec::new(),
        }
    }
    ranges
}

/// Works out body framing from `Transfer-Encoding`/`Content-Length`.
///
/// Refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-transfer-encoding>
fn parse_payload(headers: &HeaderMap) -> Result<PayloadSize, ParseError> {
    let te_header = headers.get(http::header::TRANSFER_ENCODING);
    let cl_header = headers.get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Empty)
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
            if length == 0 {
                Ok(PayloadSize::Empty)
            } else {
                Ok(PayloadSize::Length(length))
            }
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers"))
        }
    }
}

/// According to RFC 7230, chunked must be the last encoding if present.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value {
        if let Some(bytes) = value.as_bytes().rsplit(|b| *b == b',').next() {
            return bytes.trim_ascii() == CHUNKED;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const TIMEOUT: Duration = Duration::from_millis(200);

    async fn parse(raw: &[u8]) -> Result<Request, ParseError> {
        let (mut client, server) = tokio::io::duplex(16 * 1024);
        client.write_all(raw).await.unwrap();
        let mut stream = ByteStream::new(server);
        parse_request_line_and_headers(&mut stream, TIMEOUT, "127.0.0.1").await
    }

    #[tokio::test]
    async fn from_curl() {
        let request = parse(
            b"GET /index.html HTTP/1.1\r\nHost: 127.0.0.1:8080\r\nUser-Agent: curl/7.79.1\r\nAccept: */*\r\n\r\n",
        )
        .await
        .unwrap();

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.path(), "/index.html");
        assert_eq!(request.full_path(), "/index.html");
        assert!(request.query().is_empty());
        assert_eq!(request.headers().len(), 3);
        assert_eq!(request.header("host"), Some("127.0.0.1:8080"));
        assert_eq!(request.header("User-Agent"), Some("curl/7.79.1"));
        assert!(request.payload().is_empty());
        assert!(!request.is_websocket());
    }

    #[tokio::test]
    async fn query_decoding_last_wins() {
        let request = parse(b"GET /search?a=1&b=%20x&a=3 HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();

        assert_eq!(request.path(), "/search");
        assert_eq!(request.full_path(), "/search?a=1&b=%20x&a=3");
        assert_eq!(request.query().get("a").map(String::as_str), Some("3"));
        assert_eq!(request.query().get("b").map(String::as_str), Some(" x"));
    }

    #[tokio::test]
    async fn percent_decoded_path() {
        let request = parse(b"GET /files/a%20b.txt HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        assert_eq!(request.path(), "/files/a b.txt");
    }

    #[tokio::test]
    async fn cookie_header_populates_map() {
        let request =
            parse(b"GET / HTTP/1.1\r\nHost: x\r\nCookie: sid=abc; theme=dark\r\n\r\n").await.unwrap();
        assert_eq!(request.cookies().get("sid").map(String::as_str), Some("abc"));
        assert_eq!(request.cookies().get("theme").map(String::as_str), Some("dark"));
    }

    #[tokio::test]
    async fn forwarded_ip_overrides_peer() {
        let request =
            parse(b"GET / HTTP/1.1\r\nHost: x\r\nX-Forwarded-For: 10.1.2.3, 10.0.0.1\r\n\r\n").await.unwrap();
        assert_eq!(request.client_ip(), "10.1.2.3");

        let request = parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        assert_eq!(request.client_ip(), "127.0.0.1");
    }

    #[tokio::test]
    async fn range_header_parsed() {
        let request =
            parse(b"GET /f HTTP/1.1\r\nHost: x\r\nRange: bytes=0-99, 200-, -100\r\n\r\n").await.unwrap();
        assert_eq!(
            request.ranges(),
            &[ByteRange::Bounded(0, 99), ByteRange::From(200), ByteRange::Suffix(100)]
        );
    }

    #[tokio::test]
    async fn malformed_range_ignored() {
        let request = parse(b"GET /f HTTP/1.1\r\nHost: x\r\nRange: bytes=oops-9\r\n\r\n").await.unwrap();
        assert!(request.ranges().is_empty());
    }

    #[tokio::test]
    async fn websocket_upgrade_flag() {
        let request = parse(
            b"GET /chat HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
        )
        .await
        .unwrap();
        assert!(request.is_websocket());
    }

    #[tokio::test]
    async fn content_length_framing() {
        let request =
            parse(b"POST /u HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello").await.unwrap();
        assert_eq!(request.payload(), PayloadSize::Length(5));
    }

    #[tokio::test]
    async fn chunked_framing() {
        let request = parse(
            b"POST /u HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
        assert!(request.payload().is_chunked());
    }

    #[tokio::test]
    async fn malformed_request_line_rejected() {
        let err = parse(b"NOT A REQUEST\r\n\r\n").await.unwrap_err();
        assert_eq!(err.status(), Some(http::StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn both_framings_rejected() {
        let err = parse(
            b"POST /u HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidContentLength { .. }));
    }
}
