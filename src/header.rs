//! Request-line and header parsing (component D, spec §4.5).
//!
//! The parser is line-oriented and incremental: bytes arrive in whatever
//! fragments the transport hands over, and a partial line is carried across
//! calls to `feed`. This mirrors `edge_http::io::raw::read_raw_headers`'s
//! approach of reading until a terminator is seen rather than assuming a
//! single `read()` returns a whole request, but — unlike the teacher, which
//! buffers the *entire* header block and hands it to `httparse` in one
//! shot — dispatches each completed line to `httparse::parse_headers`-style
//! field recognition as it arrives, since the spec requires the fixed
//! 16-pair cap to be enforced line by line rather than after the fact.

use crate::error::Error;

/// HTTP methods this engine understands (spec §3). A request naming any
/// other method is a parse failure, matching `edge_http::Method::new`'s
/// `eq_ignore_ascii_case` dispatch but over the smaller set this spec scopes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn new(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("GET") {
            Some(Self::Get)
        } else if s.eq_ignore_ascii_case("POST") {
            Some(Self::Post)
        } else if s.eq_ignore_ascii_case("PUT") {
            Some(Self::Put)
        } else if s.eq_ignore_ascii_case("DELETE") {
            Some(Self::Delete)
        } else if s.eq_ignore_ascii_case("PATCH") {
            Some(Self::Patch)
        } else if s.eq_ignore_ascii_case("HEAD") {
            Some(Self::Head)
        } else if s.eq_ignore_ascii_case("OPTIONS") {
            Some(Self::Options)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The connection-kind tag derived from the `Upgrade` and `Accept` headers
/// (spec §3, §4.5 rule 4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionKind {
    Http,
    WebSocket,
    Event,
}

/// A fixed-capacity ordered list of raw `(name, value)` header pairs.
///
/// Modeled directly on `edge_http::Headers<'b, N>`: a small array-backed
/// store with named accessors layered on top rather than a `HashMap`,
/// because `N` is meant to be a handful of entries on a device with no
/// allocator headroom to spare on hashing overhead.
#[derive(Debug)]
pub struct Headers<const N: usize = 16>(heapless::Vec<(String, String), N>);

impl<const N: usize> Headers<N> {
    pub fn new() -> Self {
        Self(heapless::Vec::new())
    }

    /// Store a pair. Returns `false` if the cap `N` has been reached.
    pub fn push(&mut self, name: String, value: String) -> bool {
        self.0.push((name, value)).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

impl<const N: usize> Default for Headers<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully or partially parsed request (spec §3's "Request Header").
///
/// Invariant: once `is_complete` is `true`, no field is mutated again — the
/// slot moves the header into the chosen responder and never calls `feed`
/// on it again.
#[derive(Debug)]
pub struct RequestHeader<const N: usize = 16> {
    pub method: Option<Method>,
    /// The decoded URL, without the query string.
    pub url: String,
    /// The decoded query string (empty if the request target had none).
    pub query: String,
    pub http11: bool,
    pub headers: Headers<N>,
    pub is_complete: bool,

    line_acc: Vec<u8>,
    first_line_seen: bool,
    total_len: usize,
    max_total_len: usize,
    /// Bytes that arrived after the header-terminating blank line within the
    /// same `feed` call — the start of the body (or of the first WebSocket
    /// frame), which must be handed to the installed responder rather than
    /// dropped.
    trailing: Vec<u8>,
}

/// Total header-section byte cap (spec §8's "total header bytes < 8 KiB").
pub const MAX_HEADER_SECTION_LEN: usize = 8192;

impl<const N: usize> RequestHeader<N> {
    pub fn new() -> Self {
        Self {
            method: None,
            url: String::new(),
            query: String::new(),
            http11: true,
            headers: Headers::new(),
            is_complete: false,
            line_acc: Vec::new(),
            first_line_seen: false,
            total_len: 0,
            max_total_len: MAX_HEADER_SECTION_LEN,
            trailing: Vec::new(),
        }
    }

    /// Takes any bytes captured past the header-terminating blank line,
    /// leaving the internal buffer empty.
    pub fn take_trailing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.trailing)
    }

    /// Feed newly-arrived bytes. Returns `Ok(true)` once the header section
    /// is complete (the blank line terminating it has been consumed).
    ///
    /// Fragment-independent: calling `feed` repeatedly with the same bytes
    /// split at any boundaries yields the same final header, because all
    /// parsing state (the partial-line accumulator, whether the request
    /// line has been seen yet) lives on `self` rather than in a local.
    pub fn feed<E>(&mut self, bytes: &[u8]) -> Result<bool, Error<E>> {
        for (i, &b) in bytes.iter().enumerate() {
            if self.is_complete {
                self.trailing.extend_from_slice(&bytes[i..]);
                break;
            }

            self.total_len += 1;
            if self.total_len > self.max_total_len {
                return Err(Error::TooLongHeaders);
            }

            if b == b'\n' {
                if self.line_acc.last() == Some(&b'\r') {
                    self.line_acc.pop();
                }

                let line = String::from_utf8_lossy(&self.line_acc).into_owned();
                self.line_acc.clear();

                if !self.first_line_seen {
                    if line.is_empty() {
                        // Tolerate a leading blank line some clients send after POST bodies.
                        continue;
                    }

                    self.parse_request_line(&line)?;
                    self.first_line_seen = true;
                } else if line.is_empty() {
                    self.is_complete = true;
                } else {
                    self.parse_header_line(&line)?;
                }
            } else {
                self.line_acc.push(b);
            }
        }

        Ok(self.is_complete)
    }

    fn parse_request_line<E>(&mut self, line: &str) -> Result<(), Error<E>> {
        let mut parts = line.splitn(3, ' ');

        let method = parts.next().ok_or(Error::InvalidHeaders)?;
        let uri = parts.next().ok_or(Error::InvalidHeaders)?;
        let version = parts.next().ok_or(Error::InvalidHeaders)?;

        self.method = Some(Method::new(method).ok_or(Error::InvalidHeaders)?);
        self.http11 = !version.trim_end().eq_ignore_ascii_case("HTTP/1.0");

        // Split on '?' before decoding: a percent-encoded '?' (`%3F`) in the
        // path must not be mistaken for the query separator once decoded.
        let (raw_path, raw_query) = uri.split_once('?').unwrap_or((uri, ""));
        self.url = crate::url::decode(raw_path);
        self.query = crate::url::decode(raw_query);

        Ok(())
    }

    fn parse_header_line<E>(&mut self, line: &str) -> Result<(), Error<E>> {
        let (name, value) = line.split_once(':').ok_or(Error::InvalidHeaders)?;
        let name = name.trim();
        let value = value.trim();

        if !self.headers.push(name.to_string(), value.to_string()) {
            return Err(Error::TooManyHeaders);
        }

        Ok(())
    }

    /// `Host` header value, if present.
    pub fn host(&self) -> Option<&str> {
        self.headers.get("Host")
    }

    /// `Content-Type`, with any `;`-separated parameters stripped.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("Content-Type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("Content-Length")?.trim().parse().ok()
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type()
            // Compare as raw bytes rather than slicing the `str` at a fixed
            // index: a multi-byte UTF-8 character straddling byte 10 would
            // make `ct[..10]` panic on a non-char-boundary index.
            .map(|ct| {
                let bytes = ct.as_bytes();
                bytes.len() >= 10 && bytes[..10].eq_ignore_ascii_case(b"multipart/")
            })
            .unwrap_or(false)
    }

    /// The multipart boundary, stripped of surrounding quotes, if this is a
    /// multipart request.
    pub fn multipart_boundary(&self) -> Option<String> {
        let full = self.headers.get("Content-Type")?;

        if !self.is_multipart() {
            return None;
        }

        let lower = full.to_ascii_lowercase();
        let idx = lower.find("boundary=")?;
        let rest = &full[idx + "boundary=".len()..];
        let end = rest.find(';').unwrap_or(rest.len());
        let raw = rest[..end].trim();

        Some(raw.trim_matches('"').to_string())
    }

    pub fn is_expect_continue(&self) -> bool {
        self.headers
            .get("Expect")
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    /// Returns the authorization token and whether it was presented via `Digest`
    /// rather than `Basic`.
    pub fn authorization(&self) -> Option<(&str, bool)> {
        let v = self.headers.get("Authorization")?;

        if let Some(tok) = v.strip_prefix("Basic ") {
            Some((tok.trim(), false))
        } else if let Some(tok) = v.strip_prefix("Digest ") {
            Some((tok.trim(), true))
        } else {
            None
        }
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        if self
            .headers
            .get("Upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
        {
            return ConnectionKind::WebSocket;
        }

        if self
            .headers
            .get("Accept")
            .map(|v| v.to_ascii_lowercase().contains("text/event-stream"))
            .unwrap_or(false)
        {
            return ConnectionKind::Event;
        }

        ConnectionKind::Http
    }

    pub fn ws_key(&self) -> Option<&str> {
        self.headers.get("Sec-WebSocket-Key")
    }

    pub fn ws_version(&self) -> Option<&str> {
        self.headers.get("Sec-WebSocket-Version")
    }
}

impl<const N: usize> Default for RequestHeader<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn feed_all<const N: usize>(chunks: &[&[u8]]) -> RequestHeader<N> {
        let mut header = RequestHeader::<N>::new();

        for chunk in chunks {
            let done = header.feed::<()>(chunk).unwrap();
            if done {
                break;
            }
        }

        header
    }

    const REQ: &[u8] = b"GET /a%20b?x=1 HTTP/1.1\r\nHost: example\r\nContent-Length: 5\r\n\r\n";

    #[test]
    fn parses_whole_request_in_one_shot() {
        let header = feed_all::<16>(&[REQ]);

        assert_eq!(header.method, Some(Method::Get));
        assert_eq!(header.url, "/a b");
        assert_eq!(header.query, "x=1");
        assert_eq!(header.host(), Some("example"));
        assert_eq!(header.content_length(), Some(5));
        assert!(header.is_complete);
    }

    #[test]
    fn fragment_independence() {
        // Same bytes, split at every possible single boundary, must parse identically.
        for split in 1..REQ.len() {
            let (a, b) = REQ.split_at(split);
            let header = feed_all::<16>(&[a, b]);

            assert_eq!(header.method, Some(Method::Get), "split at {split}");
            assert_eq!(header.url, "/a b", "split at {split}");
            assert_eq!(header.query, "x=1", "split at {split}");
            assert_eq!(header.host(), Some("example"), "split at {split}");
            assert_eq!(header.content_length(), Some(5), "split at {split}");
            assert!(header.is_complete, "split at {split}");
        }

        // And split byte-by-byte.
        let byte_chunks: Vec<&[u8]> = REQ.iter().map(core::slice::from_ref).collect();
        let header = feed_all::<16>(&byte_chunks);
        assert!(header.is_complete);
        assert_eq!(header.url, "/a b");
    }

    #[test]
    fn unknown_method_fails() {
        let mut header = RequestHeader::<16>::new();
        let err = header.feed::<()>(b"FROB / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::InvalidHeaders));
    }

    #[test]
    fn multipart_boundary_extraction() {
        let header = feed_all::<16>(&[
            b"POST /api/upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XYZ\r\nContent-Length: 0\r\n\r\n",
        ]);

        assert!(header.is_multipart());
        assert_eq!(header.multipart_boundary().as_deref(), Some("XYZ"));
        assert_eq!(header.content_type(), Some("multipart/form-data"));
    }

    #[test]
    fn header_cap_exceeded_is_an_error() {
        let mut req = Vec::new();
        req.extend_from_slice(b"GET / HTTP/1.1\r\n");
        for i in 0..20 {
            req.extend_from_slice(format!("X-Custom-{i}: v\r\n").as_bytes());
        }
        req.extend_from_slice(b"\r\n");

        let mut header = RequestHeader::<16>::new();
        let err = header.feed::<()>(&req).unwrap_err();
        assert!(matches!(err, Error::TooManyHeaders));
    }

    #[test]
    fn percent_encoded_question_mark_is_not_the_query_separator() {
        let header = feed_all::<16>(&[b"GET /a%3Fb?x=1 HTTP/1.1\r\n\r\n" as &[u8]]);
        assert_eq!(header.url, "/a?b");
        assert_eq!(header.query, "x=1");
    }

    #[test]
    fn websocket_upgrade_is_recognized() {
        let header = feed_all::<16>(&[
            b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        ]);

        assert_eq!(header.connection_kind(), ConnectionKind::WebSocket);
        assert_eq!(header.ws_key(), Some("dGhlIHNhbXBsZSBub25jZQ=="));
    }
}
