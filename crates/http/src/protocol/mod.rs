//! Core protocol types: requests, responses and the error taxonomy.
//!
//! These are the value types that flow between the connection engine and the
//! application layer. Parsing lives in [`crate::codec`], connection lifecycle
//! in [`crate::connection`].

mod error;
mod request;
mod response;

pub use error::{ParseError, SendError, WsError};
pub use request::{ByteRange, FilePart, PayloadSize, Request};
pub use response::{BodyStream, Cookie, Response, ResponseBody, SameSite};
