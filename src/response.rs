//! Standard response header emission (spec §4.6).
//!
//! A thin wrapper over `Transport::write` that tracks whether the status
//! line and headers have already gone out, so a responder can call
//! `begin()` defensively without risking a double status line — the
//! `stdHeaderPending`-style single-shot guard the spec calls for.

use crate::error::Error;
use crate::transport::ClientTransport;

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Header-line writes use a more generous retry budget than body writes
/// (spec §11 / `RdWebConnection.cpp`'s `WEB_CONN_MAX_WRITE_RETRY_MS`).
pub const HEADER_WRITE_RETRY_MS: u32 = 10;
/// Body-chunk writes do not block waiting for socket buffer space; a
/// momentarily full send buffer is retried on the next service tick rather
/// than treated as a failure (spec §7).
pub const BODY_WRITE_RETRY_MS: u32 = 0;

/// Writes `buf` in full, retrying on `Eagain` until the whole slice has been
/// accepted or the transport reports `Fail`. Appropriate for short,
/// latency-insensitive writes like status lines and header blocks, which use
/// a nonzero retry budget; body data should go through [`PendingWrite`]
/// instead so a full socket buffer doesn't abort an in-progress transfer.
pub fn write_all<T: ClientTransport>(
    transport: &mut T,
    mut buf: &[u8],
    max_retry_ms: u32,
) -> Result<(), Error<T::Error>> {
    while !buf.is_empty() {
        match transport.write(buf, max_retry_ms) {
            crate::transport::WriteOutcome::Sent(n) => buf = &buf[n..],
            crate::transport::WriteOutcome::Eagain => return Err(Error::InvalidState),
            crate::transport::WriteOutcome::Fail => return Err(Error::ConnectionClosed),
        }
    }
    Ok(())
}

/// Carries a body write across `service()` ticks so a socket buffer that's
/// momentarily full doesn't tear the connection down (spec §7: body-chunk
/// `EAGAIN` is retried on the next tick, not a fatal error).
#[derive(Default)]
pub struct PendingWrite {
    buf: Vec<u8>,
}

impl PendingWrite {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Queues `data` to be sent. Should only be called once the previous
    /// pending write has fully flushed.
    pub fn set(&mut self, data: Vec<u8>) {
        self.buf = data;
    }

    /// Writes as much of the pending buffer as the socket accepts right now.
    /// `Ok(true)` means fully flushed; `Ok(false)` means bytes remain and the
    /// caller should call this again on the next tick rather than reading
    /// more data or popping the next queue entry.
    pub fn try_flush<T: ClientTransport>(&mut self, transport: &mut T) -> Result<bool, Error<T::Error>> {
        while !self.buf.is_empty() {
            match transport.write(&self.buf, BODY_WRITE_RETRY_MS) {
                crate::transport::WriteOutcome::Sent(n) => {
                    self.buf.drain(0..n);
                }
                crate::transport::WriteOutcome::Eagain => return Ok(false),
                crate::transport::WriteOutcome::Fail => return Err(Error::ConnectionClosed),
            }
        }
        Ok(true)
    }
}

/// Guards against emitting the status line and standard headers more than
/// once per response.
#[derive(Default)]
pub struct StdHeaderGuard {
    sent: bool,
}

impl StdHeaderGuard {
    pub fn new() -> Self {
        Self { sent: false }
    }

    pub fn already_sent(&self) -> bool {
        self.sent
    }

    /// Writes the status line and the given headers, then the blank line
    /// terminating the header section. A no-op (returns `Ok(false)`) if
    /// already called once.
    ///
    /// `connection` is the value of the `Connection` header (spec §4.6
    /// requires `Connection: close` on every plain response; an upgrade
    /// handshake passes `"Upgrade"` instead).
    pub fn send<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        status: u16,
        extra_headers: &[(&str, &str)],
        content_length: Option<u64>,
        connection: &str,
    ) -> Result<bool, Error<T::Error>> {
        if self.sent {
            return Ok(false);
        }

        let status_line = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
        write_all(transport, status_line.as_bytes(), HEADER_WRITE_RETRY_MS)?;

        let connection_line = format!("Connection: {connection}\r\n");
        write_all(transport, connection_line.as_bytes(), HEADER_WRITE_RETRY_MS)?;

        for (name, value) in extra_headers {
            let line = format!("{name}: {value}\r\n");
            write_all(transport, line.as_bytes(), HEADER_WRITE_RETRY_MS)?;
        }

        if let Some(len) = content_length {
            let line = format!("Content-Length: {len}\r\n");
            write_all(transport, line.as_bytes(), HEADER_WRITE_RETRY_MS)?;
        }

        write_all(transport, b"\r\n", HEADER_WRITE_RETRY_MS)?;
        self.sent = true;
        Ok(true)
    }
}

/// Outcome of one `Responder::service` call (spec §4.3's RESPONDING state).
pub enum ServiceOutcome {
    /// More work remains; call `service` again once the transport is ready.
    Continue,
    /// The response is fully sent; the slot may return to FREE.
    Done,
    /// The connection has transitioned to a persistent upgraded link
    /// (WebSocket or SSE) and must not be recycled on the usual timeline.
    Upgraded,
}

/// A headers-only response used for routing/parse failures (spec §4.3's
/// PARSING_HEADERS failure path, §4.7's channel-exhaustion 503, and
/// unmatched-route 404s) — no responder proper is dispatched, just a status
/// line and the standard headers.
pub struct StatusResponder {
    status: u16,
    guard: StdHeaderGuard,
    done: bool,
}

impl StatusResponder {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            guard: StdHeaderGuard::new(),
            done: false,
        }
    }

    pub fn service<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        _now_ms: u32,
    ) -> Result<ServiceOutcome, Error<T::Error>> {
        if !self.done {
            self.guard.send(transport, self.status, &[], Some(0), "close")?;
            self.done = true;
        }
        Ok(ServiceOutcome::Done)
    }
}
