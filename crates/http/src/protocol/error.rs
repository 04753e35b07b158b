use std::io;

use http::StatusCode;
use thiserror::Error;

/// Errors raised while reading or parsing a request.
///
/// Transport-level variants ([`ParseError::Timeout`],
/// [`ParseError::ConnectionAborted`]) carry no client-facing status: the
/// connection decides between a `408` and a silent close. Everything else maps
/// to a `400`-class response via [`ParseError::status`].
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid chunk framing: {reason}")]
    InvalidChunk { reason: String },

    #[error("body digest does not match content-md5 trailer")]
    BodyDigestMismatch,

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("read timed out")]
    Timeout,

    #[error("peer closed the connection mid-read")]
    ConnectionAborted,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn invalid_request_line<S: ToString>(reason: S) -> Self {
        Self::InvalidRequestLine { reason: reason.to_string() }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }

    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    /// True if the connection must be torn down without attempting a response.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionAborted | Self::Io { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Status code for the client-facing error response, if one can be sent.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Timeout => Some(StatusCode::REQUEST_TIMEOUT),
            Self::ConnectionAborted | Self::Io { .. } => None,
            _ => Some(StatusCode::BAD_REQUEST),
        }
    }
}

/// Errors raised while serializing or writing a response.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }
}

/// Errors of the WebSocket protocol layer.
///
/// Any of these ends the session; decode errors never crash the process.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("read timed out")]
    Timeout,

    #[error("session already closed")]
    SessionClosed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl WsError {
    pub fn invalid_frame<S: ToString>(reason: S) -> Self {
        Self::InvalidFrame { reason: reason.to_string() }
    }
}

impl From<ParseError> for WsError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Timeout => WsError::Timeout,
            ParseError::ConnectionAborted => WsError::ConnectionClosed,
            ParseError::Io { source } => WsError::Io { source },
            other => WsError::invalid_frame(other.to_string()),
        }
    }
}
