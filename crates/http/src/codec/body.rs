//! Request body reception and interpretation.
//!
//! [`BodyReader`] pulls body bytes off the stream according to the framing
//! negotiated at parse time (content-length or chunked), either in full or
//! one chunk at a time. [`parse_body`] then interprets received bytes by
//! content type into json, form fields or multipart files.

use std::collections::HashMap;
use std::time::Duration;

use base64ct::{Base64, Encoding};
use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::protocol::{FilePart, ParseError, PayloadSize, Request};
use crate::stream::ByteStream;
use crate::utils::{ensure, find_subsequence, percent_decode};

/// Upper bound for one chunk-size line, generous for extensions.
const MAX_CHUNK_LINE: usize = 1024;

/// Upper bound for the trailer section after the terminal chunk.
const MAX_TRAILER_BYTES: usize = 8 * 1024;

/// Largest slice taken from a content-length body in one partial read.
const LENGTH_READ_CAP: u64 = 64 * 1024;

/// Stateful body receiver for one request.
///
/// Created from the request's [`PayloadSize`] and driven until
/// [`BodyReader::is_done`]; the connection drains whatever the handler left
/// unread so the stream stays aligned on the next request boundary.
pub struct BodyReader {
    payload: PayloadSize,
    remaining: u64,
    digest: Md5,
    done: bool,
}

impl BodyReader {
    pub fn new(payload: PayloadSize) -> Self {
        let remaining = match payload {
            PayloadSize::Length(n) => n,
            _ => 0,
        };
        Self { payload, remaining, digest: Md5::new(), done: payload.is_empty() }
    }

    /// True once the body has been read to its framing boundary.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Receives body bytes into `request`.
    ///
    /// With `get_all` the whole remaining body is read before returning
    /// `Ok(true)`. Without it one unit is read per call (one chunk for
    /// chunked framing, a bounded slice for content-length) and the return
    /// value says whether the body is now complete.
    pub async fn recv<S>(
        &mut self,
        stream: &mut ByteStream<S>,
        request: &mut Request,
        get_all: bool,
        timeout: Duration,
    ) -> Result<bool, ParseError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.done {
            return Ok(true);
        }

        match self.payload {
            PayloadSize::Empty => {
                self.done = true;
                Ok(true)
            }
            PayloadSize::Length(_) => loop {
                let take = self.remaining.min(LENGTH_READ_CAP) as usize;
                let data = stream.read_exact(take, timeout).await?;
                self.remaining -= data.len() as u64;
                request.append_body(&data);
                if self.remaining == 0 {
                    self.done = true;
                    return Ok(true);
                }
                if !get_all {
                    return Ok(false);
                }
            },
            PayloadSize::Chunked => loop {
                match self.read_chunk(stream, timeout).await? {
                    Some(data) => {
                        request.append_body(&data);
                        if !get_all {
                            return Ok(false);
                        }
                    }
                    None => {
                        self.finish_trailers(stream, request, timeout).await?;
                        self.done = true;
                        return Ok(true);
                    }
                }
            },
        }
    }

    /// Reads and discards the unread remainder of the body.
    pub async fn drain<S>(&mut self, stream: &mut ByteStream<S>, timeout: Duration) -> Result<(), ParseError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.done {
            return Ok(());
        }
        trace!("draining unread request body");

        match self.payload {
            PayloadSize::Empty => {}
            PayloadSize::Length(_) => {
                while self.remaining > 0 {
                    let take = self.remaining.min(LENGTH_READ_CAP) as usize;
                    let data = stream.read_exact(take, timeout).await?;
                    self.remaining -= data.len() as u64;
                }
            }
            PayloadSize::Chunked => {
                while self.read_chunk(stream, timeout).await?.is_some() {}
                // Discard trailers, no digest check on a drained body.
                loop {
                    let line = stream.read_until(b"\r\n", timeout, MAX_TRAILER_BYTES).await?;
                    if line.as_ref() == b"\r\n" {
                        break;
                    }
                }
            }
        }
        self.done = true;
        Ok(())
    }

    /// Reads one chunk. `None` marks the terminal zero-size chunk; the
    /// trailer section is left on the stream.
    async fn read_chunk<S>(
        &mut self,
        stream: &mut ByteStream<S>,
        timeout: Duration,
    ) -> Result<Option<Bytes>, ParseError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let line = stream.read_until(b"\r\n", timeout, MAX_CHUNK_LINE).await?;
        let line = std::str::from_utf8(&line[..line.len() - 2])
            .map_err(|_| ParseError::invalid_chunk("size line is not ascii"))?;
        // Chunk extensions after ';' are tolerated and ignored.
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ParseError::invalid_chunk(format!("bad chunk size {size_str:?}")))?;

        if size == 0 {
            return Ok(None);
        }

        let data = stream.read_exact(size + 2, timeout).await?;
        ensure!(
            data.ends_with(b"\r\n"),
            ParseError::invalid_chunk("chunk data not terminated by CRLF")
        );
        let data = data.slice(..size);
        self.digest.update(&data);
        Ok(Some(data))
    }

    /// Consumes trailer lines after the terminal chunk and validates the
    /// `Content-MD5` trailer against the received bytes when present.
    async fn finish_trailers<S>(
        &mut self,
        stream: &mut ByteStream<S>,
        request: &mut Request,
        timeout: Duration,
    ) -> Result<(), ParseError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut expected_md5 = None;
        loop {
            let line = stream.read_until(b"\r\n", timeout, MAX_TRAILER_BYTES).await?;
            if line.as_ref() == b"\r\n" {
                break;
            }
            let Ok(line) = std::str::from_utf8(&line[..line.len() - 2]) else {
                continue;
            };
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-md5") {
                    expected_md5 = Some(value.trim().to_string());
                }
            }
        }

        if let Some(expected) = expected_md5 {
            let digest = std::mem::take(&mut self.digest).finalize();
            let matches = Base64::decode_vec(&expected)
                .map(|decoded| decoded == digest.as_slice())
                .unwrap_or(false);
            ensure!(matches, ParseError::BodyDigestMismatch);
            trace!(client_ip = request.client_ip(), "content-md5 trailer verified");
        }
        Ok(())
    }
}

/// Interprets a fully received body by its `Content-Type`.
///
/// Malformed json is an error (the route expected a machine-readable
/// payload); malformed form and multipart bodies degrade to the raw bytes
/// already stored on the request.
pub fn parse_body(request: &mut Request) -> Result<(), ParseError> {
    let Some(body) = request.body().cloned() else {
        return Ok(());
    };
    let Some(content_type) = request.header("content-type") else {
        return Ok(());
    };
    let Ok(mime_type) = content_type.parse::<mime::Mime>() else {
        return Ok(());
    };

    match (mime_type.type_(), mime_type.subtype()) {
        (mime::APPLICATION, mime::JSON) => {
            let json = serde_json::from_slice(&body)
                .map_err(|e| ParseError::invalid_body(format!("malformed json body: {e}")))?;
            request.set_json(json);
        }
        (mime::APPLICATION, mime::WWW_FORM_URLENCODED) => {
            request.set_form(parse_form(&body));
        }
        (mime::MULTIPART, mime::FORM_DATA) => {
            if let Some(boundary) = mime_type.get_param(mime::BOUNDARY) {
                let (form, files) = parse_multipart(&body, boundary.as_str());
                request.set_form(form);
                request.set_files(files);
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_form(body: &[u8]) -> HashMap<String, String> {
    body.split(|b| *b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match find_subsequence(pair, b"=") {
            Some(i) => (
                String::from_utf8_lossy(&percent_decode(&pair[..i], true)).into_owned(),
                String::from_utf8_lossy(&percent_decode(&pair[i + 1..], true)).into_owned(),
            ),
            None => (String::from_utf8_lossy(&percent_decode(pair, true)).into_owned(), String::new()),
        })
        .collect()
}

/// Splits a multipart body on its boundary and sorts parts into plain form
/// fields and file uploads. Parts without a `Content-Disposition` name are
/// skipped.
fn parse_multipart(body: &[u8], boundary: &str) -> (HashMap<String, String>, Vec<FilePart>) {
    let mut form = HashMap::new();
    let mut files = Vec::new();

    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut rest = body;
    // Skip the preamble up to the first delimiter.
    let Some(pos) = find_subsequence(rest, delimiter) else {
        return (form, files);
    };
    rest = &rest[pos + delimiter.len()..];

    loop {
        if rest.starts_with(b"--") {
            break;
        }
        let part_start = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        let Some(end) = find_subsequence(part_start, delimiter) else {
            break;
        };
        let part = &part_start[..end];
        rest = &part_start[end + delimiter.len()..];

        let Some(split) = find_subsequence(part, b"\r\n\r\n") else {
            continue;
        };
        let head = &part[..split];
        let mut content = &part[split + 4..];
        // Part content excludes the CRLF that precedes the next delimiter.
        if content.ends_with(b"\r\n") {
            content = &content[..content.len() - 2];
        }

        let Some((name, filename)) = parse_disposition(head) else {
            continue;
        };
        match filename {
            Some(filename) => {
                files.push(FilePart { name, filename, data: Bytes::copy_from_slice(content) })
            }
            None => {
                form.insert(name, String::from_utf8_lossy(content).into_owned());
            }
        }
    }
    (form, files)
}

/// Pulls `name` and optional `filename` out of a part's
/// `Content-Disposition` header.
fn parse_disposition(head: &[u8]) -> Option<(String, Option<String>)> {
    let head = std::str::from_utf8(head).ok()?;
    let line = head
        .split("\r\n")
        .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"))?;

    let mut name = None;
    let mut filename = None;
    for attr in line.split(';').skip(1) {
        let attr = attr.trim();
        if let Some(v) = attr.strip_prefix("name=") {
            name = Some(v.trim_matches('"').to_string());
        } else if let Some(v) = attr.strip_prefix("filename=") {
            filename = Some(v.trim_matches('"').to_string());
        }
    }
    name.map(|n| (n, filename))
}
