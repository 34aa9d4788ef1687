//! Crate-wide error types.
//!
//! Mirrors `edge_http::io::Error<E>`: a single enum generic over the
//! transport's own I/O error type, with a hand-written `Display` impl
//! rather than a derive-macro crate.

use core::fmt::{self, Display};

/// Errors that can occur while parsing a request or driving a connection.
#[derive(Debug)]
pub enum Error<E> {
    /// The request line or a header line could not be parsed.
    InvalidHeaders,
    /// More header pairs arrived than the slot's fixed cap allows.
    TooManyHeaders,
    /// The accumulated header section exceeded the scratch buffer.
    TooLongHeaders,
    /// `Content-Length` or a multipart boundary could not be parsed.
    InvalidBody,
    /// No responder could be produced and no fallback status applies.
    InvalidState,
    /// The peer closed the connection.
    ConnectionClosed,
    /// The underlying transport reported a hard failure.
    Io(E),
}

impl<E> Display for Error<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHeaders => write!(f, "invalid HTTP request line or headers"),
            Self::TooManyHeaders => write!(f, "too many HTTP headers"),
            Self::TooLongHeaders => write!(f, "HTTP header section too long"),
            Self::InvalidBody => write!(f, "invalid request body"),
            Self::InvalidState => write!(f, "connection is not in the requested state"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl<E> std::error::Error for Error<E> where E: std::error::Error {}

impl<E> Error<E> {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::TooManyHeaders)
    }
}
