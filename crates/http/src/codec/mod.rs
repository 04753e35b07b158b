//! Wire-level parsing and serialization.
//!
//! - [`request`]: request line + header parsing off the byte stream
//! - [`body`]: body reception (content-length and chunked) and body
//!   interpretation (json/form/multipart)
//! - [`response`]: the response serialization pipeline
//! - [`encoding`]: content-coding negotiation and compressors

pub mod body;
pub mod encoding;
pub mod request;
pub mod response;
