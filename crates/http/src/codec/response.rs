//! The response serialization pipeline.
//!
//! [`write_response`] takes a finished [`Response`] through five stages:
//! range satisfiability, header completion, range slicing, compression and
//! the wire write. The final status code is returned for access logging.

use std::io::Write as _;

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use http::header::{HeaderName, HeaderValue};
use http::{StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::codec::encoding::{self, ContentEncoding};
use crate::config::ServerConfig;
use crate::protocol::{ByteRange, Request, Response, ResponseBody, SendError};
use crate::stream::ByteStream;

/// Boundary used for `multipart/byteranges` bodies.
const RANGE_BOUNDARY: &str = "wafer0range0boundary";

/// How the body bytes on the wire are delimited.
#[derive(Debug, Clone, Copy)]
enum BodyFraming {
    /// `Content-Length` computed from the fixed body.
    Fixed,
    /// `Transfer-Encoding: chunked` around a stream body.
    Chunked,
    /// The handler supplied its own framing headers; bytes go out as-is.
    Caller,
    /// HTTP/1.0 stream body, delimited by closing the connection.
    UntilClose,
}

/// The parts of an exchange the serializer needs from the request side.
///
/// Built from the parsed request, or from [`ExchangeContext::fallback`] when
/// an error response must be written before a request exists.
#[derive(Debug)]
pub struct ExchangeContext<'a> {
    pub version: Version,
    pub head_only: bool,
    pub ranges: &'a [ByteRange],
    pub accept_encoding: Option<&'a str>,
    /// The connection's keep-alive decision for this exchange.
    pub keep_alive: bool,
}

impl<'a> ExchangeContext<'a> {
    pub fn from_request(request: &'a Request, keep_alive: bool) -> Self {
        Self {
            version: request.version(),
            head_only: request.method() == http::Method::HEAD,
            ranges: request.ranges(),
            accept_encoding: request.header("accept-encoding"),
            keep_alive,
        }
    }

    /// Context for responses written before a request could be parsed.
    pub fn fallback() -> Self {
        Self { version: Version::HTTP_11, head_only: false, ranges: &[], accept_encoding: None, keep_alive: false }
    }
}

/// Serializes and writes one response. Returns the status actually sent,
/// which can differ from the handler's (range adjustment), and whether the
/// connection may be kept alive: a close-delimited body vetoes the
/// connection's own keep-alive decision.
pub async fn write_response<S>(
    stream: &mut ByteStream<S>,
    ctx: &ExchangeContext<'_>,
    mut response: Response,
    config: &ServerConfig,
) -> Result<(StatusCode, bool), SendError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let body = response.take_body();

    // Pull the body apart into fixed bytes or a lazy stream.
    let (mut data, stream_body, file_meta) = match body {
        ResponseBody::Empty => (None, None, None),
        ResponseBody::Full(data) => (Some(data), None, None),
        ResponseBody::File { filename, data, preview } => (Some(data), None, Some((filename, preview))),
        ResponseBody::Stream(s) => (None, Some(s), None),
    };

    let content_type = resolve_content_type(&response, &data, file_meta.as_ref());
    if let Some((filename, preview)) = &file_meta {
        if !response.headers().contains_key(http::header::CONTENT_DISPOSITION) {
            let disposition = if *preview && previewable(&content_type) { "inline" } else { "attachment" };
            let value = format!("{disposition}; filename=\"{filename}\"");
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(http::header::CONTENT_DISPOSITION, value);
            }
        }
    }

    // Range service applies to successful fixed bodies only.
    let mut range_applied = false;
    if response.status_code() == StatusCode::OK && !ctx.ranges.is_empty() {
        if let Some(full) = data.take() {
            let (status, sliced, extra) = apply_ranges(&full, ctx.ranges, &content_type);
            response.set_status(status);
            // The range stage takes over framing for the adjusted body.
            response.headers_mut().remove(http::header::CONTENT_LENGTH);
            response.headers_mut().remove(http::header::TRANSFER_ENCODING);
            for (name, value) in extra {
                response.headers_mut().insert(name, value);
            }
            range_applied = status == StatusCode::PARTIAL_CONTENT;
            data = sliced;
        }
    }

    // A handler that set its own framing headers owns the body bytes;
    // they pass through untouched and nothing is recomputed.
    let caller_framing = response.headers().contains_key(http::header::CONTENT_LENGTH)
        || response.headers().contains_key(http::header::TRANSFER_ENCODING);
    let framing = if caller_framing {
        BodyFraming::Caller
    } else if stream_body.is_some() {
        // Chunked framing is an HTTP/1.1 construct; a 1.0 peer gets the
        // raw bytes and the close delimits them.
        if ctx.version == Version::HTTP_10 { BodyFraming::UntilClose } else { BodyFraming::Chunked }
    } else {
        BodyFraming::Fixed
    };

    // Compression, never combined with range slicing or caller framing.
    if !range_applied && !caller_framing {
        if let Some(full) = data.take() {
            data = Some(compress_body(&mut response, ctx, config, full)?);
        }
    }

    let keep_alive = ctx.keep_alive && !matches!(framing, BodyFraming::UntilClose);

    let head = build_head(&response, ctx, config, &content_type, &data, framing, keep_alive);
    stream.write_all(&head).await.map_err(SendError::from)?;

    let status = response.status_code();
    let suppress_body = ctx.head_only || !status_allows_body(status);

    if !suppress_body {
        if let Some(data) = &data {
            stream.write_all(data).await.map_err(SendError::from)?;
        } else if let Some(mut chunks) = stream_body {
            let chunked = matches!(framing, BodyFraming::Chunked);
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(SendError::from)?;
                if chunk.is_empty() {
                    continue;
                }
                if chunked {
                    let size_line = format!("{:x}\r\n", chunk.len());
                    stream.write_all(size_line.as_bytes()).await.map_err(SendError::from)?;
                    stream.write_all(&chunk).await.map_err(SendError::from)?;
                    stream.write_all(b"\r\n").await.map_err(SendError::from)?;
                } else {
                    stream.write_all(&chunk).await.map_err(SendError::from)?;
                }
            }
            if chunked {
                stream.write_all(b"0\r\n\r\n").await.map_err(SendError::from)?;
            }
        }
    }
    stream.flush().await.map_err(SendError::from)?;

    trace!(status = status.as_u16(), "response written");
    Ok((status, keep_alive))
}

/// Content type from the handler's header, the file extension, or the
/// octet-stream default. Empty bodies carry no type.
fn resolve_content_type(
    response: &Response,
    data: &Option<Bytes>,
    file_meta: Option<&(String, bool)>,
) -> String {
    if let Some(value) = response.headers().get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        return value.to_string();
    }
    if let Some((filename, _)) = file_meta {
        return mime_guess::from_path(filename).first_or_octet_stream().to_string();
    }
    if data.is_some() {
        return mime::APPLICATION_OCTET_STREAM.to_string();
    }
    String::new()
}

/// MIME types a browser can render directly, eligible for inline disposition.
fn previewable(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence.starts_with("text/")
        || essence.starts_with("image/")
        || essence.starts_with("audio/")
        || essence.starts_with("video/")
        || essence == "application/pdf"
        || essence == "application/json"
}

/// Resolves the requested ranges against a fixed body.
///
/// All ranges unsatisfiable yields a `416` with an empty body; one range
/// yields a plain `206` slice; several yield a `multipart/byteranges` body.
fn apply_ranges(
    full: &Bytes,
    ranges: &[ByteRange],
    content_type: &str,
) -> (StatusCode, Option<Bytes>, Vec<(HeaderName, HeaderValue)>) {
    let total = full.len() as u64;
    let resolved: Vec<(u64, u64)> = ranges.iter().filter_map(|r| r.resolve(total)).collect();

    if resolved.is_empty() {
        let value = HeaderValue::from_str(&format!("bytes */{total}")).expect("ascii header");
        return (StatusCode::RANGE_NOT_SATISFIABLE, None, vec![(http::header::CONTENT_RANGE, value)]);
    }

    if let [(start, end)] = resolved[..] {
        let slice = full.slice(start as usize..=end as usize);
        let value = HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).expect("ascii header");
        return (StatusCode::PARTIAL_CONTENT, Some(slice), vec![(http::header::CONTENT_RANGE, value)]);
    }

    let mut body = Vec::new();
    for (start, end) in &resolved {
        let _ = write!(
            body,
            "--{RANGE_BOUNDARY}\r\nContent-Type: {content_type}\r\nContent-Range: bytes {start}-{end}/{total}\r\n\r\n",
        );
        body.extend_from_slice(&full[*start as usize..=*end as usize]);
        body.extend_from_slice(b"\r\n");
    }
    let _ = write!(body, "--{RANGE_BOUNDARY}--\r\n");

    let ct = HeaderValue::from_str(&format!("multipart/byteranges; boundary={RANGE_BOUNDARY}"))
        .expect("ascii header");
    (StatusCode::PARTIAL_CONTENT, Some(Bytes::from(body)), vec![(http::header::CONTENT_TYPE, ct)])
}

/// Applies forced or negotiated compression to a fixed body, setting the
/// `Content-Encoding` and `Vary` headers when bytes were actually encoded.
fn compress_body(
    response: &mut Response,
    ctx: &ExchangeContext<'_>,
    config: &ServerConfig,
    full: Bytes,
) -> Result<Bytes, SendError> {
    let picked: Option<(ContentEncoding, Option<u32>)> = match response.forced_encoding() {
        Some((scheme, level)) => Some((scheme, Some(level))),
        None => {
            if full.len() < config.compress_min_length {
                None
            } else {
                encoding::negotiate(ctx.accept_encoding, &config.compress_schemes).map(|s| (s, None))
            }
        }
    };

    let Some((scheme, level)) = picked else {
        return Ok(full);
    };

    let compressed = encoding::compress(scheme, level, &full)
        .map_err(|e| SendError::invalid_body(format!("compression failed: {e}")))?;
    response
        .headers_mut()
        .insert(http::header::CONTENT_ENCODING, HeaderValue::from_static(scheme.token()));
    response.headers_mut().insert(http::header::VARY, HeaderValue::from_static("Accept-Encoding"));
    Ok(compressed)
}

fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

/// Renders the status line and the complete header section.
fn build_head(
    response: &Response,
    ctx: &ExchangeContext<'_>,
    config: &ServerConfig,
    content_type: &str,
    data: &Option<Bytes>,
    framing: BodyFraming,
    keep_alive: bool,
) -> Vec<u8> {
    let status = response.status_code();
    let version = match ctx.version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    };
    let reason = status.canonical_reason().unwrap_or("");

    let mut head = Vec::with_capacity(256);
    let _ = write!(head, "{version} {} {reason}\r\n", status.as_u16());

    let date_format =
        if config.date_microseconds { "%a, %d %b %Y %H:%M:%S%.6f GMT" } else { "%a, %d %b %Y %H:%M:%S GMT" };
    let _ = write!(head, "Date: {}\r\n", Utc::now().format(date_format));
    let _ = write!(head, "Server: {}\r\n", config.server_name);

    if !content_type.is_empty() && !response.headers().contains_key(http::header::CONTENT_TYPE) {
        let _ = write!(head, "Content-Type: {content_type}\r\n");
    }

    if status_allows_body(status) {
        match framing {
            BodyFraming::Fixed => {
                let len = data.as_ref().map_or(0, Bytes::len);
                let _ = write!(head, "Content-Length: {len}\r\n");
            }
            BodyFraming::Chunked => head.extend_from_slice(b"Transfer-Encoding: chunked\r\n"),
            BodyFraming::Caller | BodyFraming::UntilClose => {}
        }
    }

    if !response.headers().contains_key(http::header::CONNECTION) {
        if keep_alive {
            head.extend_from_slice(b"Connection: keep-alive\r\n");
            let _ = write!(
                head,
                "Keep-Alive: timeout={}, max={}\r\n",
                config.keep_alive_timeout.as_secs(),
                config.keep_alive_max_requests
            );
        } else {
            head.extend_from_slice(b"Connection: close\r\n");
        }
    }

    for (name, value) in response.headers() {
        let _ = write!(head, "{name}: ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    for cookie in response.cookies() {
        let _ = write!(head, "Set-Cookie: {}\r\n", cookie.render());
    }

    head.extend_from_slice(b"\r\n");
    head
}


#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncReadExt;

    use crate::protocol::Cookie;

    async fn serialize(ctx: ExchangeContext<'_>, response: Response) -> (StatusCode, Vec<u8>) {
        let config = ServerConfig::default();
        let (mut client, server) = tokio::io::duplex(256 * 1024);
        let mut stream = ByteStream::new(server);

        let (status, _) = write_response(&mut stream, &ctx, response, &config).await.unwrap();
        drop(stream);

        let mut wire = Vec::new();
        client.read_to_end(&mut wire).await.unwrap();
        (status, wire)
    }

    fn split_head(wire: &[u8]) -> (String, &[u8]) {
        let pos = wire.windows(4).position(|w| w == b"\r\n\r\n").expect("head terminator");
        (String::from_utf8_lossy(&wire[..pos + 4]).into_owned(), &wire[pos + 4..])
    }

    fn header_value(head: &str, name: &str) -> Option<String> {
        head.lines().find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim().to_string())
        })
    }

    #[tokio::test]
    async fn plain_text_response() {
        let (status, wire) = serialize(ExchangeContext::fallback(), Response::text("hi there")).await;
        let (head, body) = split_head(&wire);

        assert_eq!(status, StatusCode::OK);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(header_value(&head, "content-length").as_deref(), Some("8"));
        assert_eq!(header_value(&head, "content-type").as_deref(), Some("text/plain; charset=utf-8"));
        assert_eq!(header_value(&head, "connection").as_deref(), Some("close"));
        assert_eq!(header_value(&head, "server").as_deref(), Some("wafer"));
        assert!(header_value(&head, "date").is_some());
        assert_eq!(body, b"hi there");
    }

    #[tokio::test]
    async fn keep_alive_headers_emitted() {
        let ctx = ExchangeContext { keep_alive: true, ..ExchangeContext::fallback() };
        let (_, wire) = serialize(ctx, Response::text("x")).await;
        let (head, _) = split_head(&wire);

        assert_eq!(header_value(&head, "connection").as_deref(), Some("keep-alive"));
        assert_eq!(header_value(&head, "keep-alive").as_deref(), Some("timeout=5, max=100"));
    }

    #[tokio::test]
    async fn head_request_suppresses_body() {
        let ctx = ExchangeContext { head_only: true, ..ExchangeContext::fallback() };
        let (_, wire) = serialize(ctx, Response::text("hi there")).await;
        let (head, body) = split_head(&wire);

        assert_eq!(header_value(&head, "content-length").as_deref(), Some("8"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn no_content_has_no_body_headers() {
        let (_, wire) = serialize(ExchangeContext::fallback(), Response::new(StatusCode::NO_CONTENT)).await;
        let (head, body) = split_head(&wire);

        assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(header_value(&head, "content-length").is_none());
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn single_range_sliced() {
        let data = Bytes::from(vec![b'a'; 1000]);
        let ranges = [ByteRange::Bounded(0, 99)];
        let ctx = ExchangeContext { ranges: &ranges, ..ExchangeContext::fallback() };

        let (status, wire) = serialize(ctx, Response::new(StatusCode::OK).with_body_for_test(data)).await;
        let (head, body) = split_head(&wire);

        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(header_value(&head, "content-range").as_deref(), Some("bytes 0-99/1000"));
        assert_eq!(header_value(&head, "content-length").as_deref(), Some("100"));
        assert_eq!(body.len(), 100);
    }

    #[tokio::test]
    async fn unsatisfiable_range_yields_416() {
        let data = Bytes::from(vec![b'a'; 1000]);
        let ranges = [ByteRange::From(2000)];
        let ctx = ExchangeContext { ranges: &ranges, ..ExchangeContext::fallback() };

        let (status, wire) = serialize(ctx, Response::new(StatusCode::OK).with_body_for_test(data)).await;
        let (head, body) = split_head(&wire);

        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(header_value(&head, "content-range").as_deref(), Some("bytes */1000"));
        assert_eq!(header_value(&head, "content-length").as_deref(), Some("0"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn multiple_ranges_build_multipart() {
        let data = Bytes::from((0u16..1000).map(|i| (i % 256) as u8).collect::<Vec<u8>>());
        let ranges = [ByteRange::Bounded(0, 9), ByteRange::Suffix(10)];
        let ctx = ExchangeContext { ranges: &ranges, ..ExchangeContext::fallback() };

        let (status, wire) = serialize(ctx, Response::new(StatusCode::OK).with_body_for_test(data)).await;
        let (head, body) = split_head(&wire);

        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        let ct = header_value(&head, "content-type").unwrap();
        assert!(ct.starts_with("multipart/byteranges; boundary="));
        let text = String::from_utf8_lossy(body);
        assert!(text.contains("Content-Range: bytes 0-9/1000"));
        assert!(text.contains("Content-Range: bytes 990-999/1000"));
        assert!(text.trim_end().ends_with(&format!("--{RANGE_BOUNDARY}--")));
    }

    #[tokio::test]
    async fn negotiated_compression_applied() {
        let data = "hello world ".repeat(200);
        let ctx = ExchangeContext { accept_encoding: Some("gzip"), ..ExchangeContext::fallback() };

        let (_, wire) = serialize(ctx, Response::text(data.clone())).await;
        let (head, body) = split_head(&wire);

        assert_eq!(header_value(&head, "content-encoding").as_deref(), Some("gzip"));
        assert_eq!(header_value(&head, "vary").as_deref(), Some("Accept-Encoding"));

        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(body);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn small_body_not_compressed() {
        let ctx = ExchangeContext { accept_encoding: Some("gzip"), ..ExchangeContext::fallback() };
        let (_, wire) = serialize(ctx, Response::text("tiny")).await;
        let (head, body) = split_head(&wire);

        assert!(header_value(&head, "content-encoding").is_none());
        assert_eq!(body, b"tiny");
    }

    #[tokio::test]
    async fn stream_body_written_chunked() {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"hello")), Ok(Bytes::from_static(b" world"))];
        let response = Response::stream(Box::pin(futures::stream::iter(chunks)));

        let (_, wire) = serialize(ExchangeContext::fallback(), response).await;
        let (head, body) = split_head(&wire);

        assert_eq!(header_value(&head, "transfer-encoding").as_deref(), Some("chunked"));
        assert!(header_value(&head, "content-length").is_none());
        assert_eq!(body, b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn caller_content_length_keeps_stream_unchunked() {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"hello")), Ok(Bytes::from_static(b" world"))];
        let mut response = Response::stream(Box::pin(futures::stream::iter(chunks)));
        response.headers_mut().insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("11"));

        let (_, wire) = serialize(ExchangeContext::fallback(), response).await;
        let (head, body) = split_head(&wire);

        assert_eq!(header_value(&head, "content-length").as_deref(), Some("11"));
        assert!(header_value(&head, "transfer-encoding").is_none());
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn http10_stream_delimited_by_close() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"data"))];
        let response = Response::stream(Box::pin(futures::stream::iter(chunks)));
        let ctx =
            ExchangeContext { version: Version::HTTP_10, keep_alive: true, ..ExchangeContext::fallback() };

        let (_, wire) = serialize(ctx, response).await;
        let (head, body) = split_head(&wire);

        assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(header_value(&head, "transfer-encoding").is_none());
        assert!(header_value(&head, "content-length").is_none());
        assert_eq!(header_value(&head, "connection").as_deref(), Some("close"));
        assert_eq!(body, b"data");
    }

    #[tokio::test]
    async fn forced_encoding_skips_negotiation_and_min_length() {
        let response = Response::text("tiny").with_encoding(ContentEncoding::Gzip, 6);
        let (_, wire) = serialize(ExchangeContext::fallback(), response).await;
        let (head, body) = split_head(&wire);

        assert_eq!(header_value(&head, "content-encoding").as_deref(), Some("gzip"));

        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(body);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "tiny");
    }

    #[tokio::test]
    async fn file_response_guesses_type_and_disposition() {
        let response = Response::file("report.pdf", Bytes::from_static(b"%PDF-"), true);
        let (_, wire) = serialize(ExchangeContext::fallback(), response).await;
        let (head, _) = split_head(&wire);

        assert_eq!(header_value(&head, "content-type").as_deref(), Some("application/pdf"));
        assert_eq!(
            header_value(&head, "content-disposition").as_deref(),
            Some("inline; filename=\"report.pdf\"")
        );
    }

    #[tokio::test]
    async fn cookies_rendered_as_set_cookie() {
        let mut response = Response::text("x");
        response.set_cookie(Cookie::new("sid", "abc"));
        let (_, wire) = serialize(ExchangeContext::fallback(), response).await;
        let (head, _) = split_head(&wire);

        assert_eq!(header_value(&head, "set-cookie").as_deref(), Some("sid=abc; Path=/"));
    }

    #[tokio::test]
    async fn response_reparses_cleanly() {
        let (_, wire) = serialize(ExchangeContext::fallback(), Response::text("echo")).await;

        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Response::new(&mut headers);
        let status = parsed.parse(&wire).unwrap();
        assert!(status.is_complete());
        assert_eq!(parsed.code, Some(200));
    }

    impl Response {
        fn with_body_for_test(mut self, data: Bytes) -> Self {
            self.set_body(ResponseBody::Full(data));
            self
        }
    }
}
