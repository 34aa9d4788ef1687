//! The Responder sum type (spec §3, §4.3).
//!
//! A connection slot owns exactly one of these once it leaves DISPATCHING.
//! The spec calls for a tagged variant rather than a `dyn Handler` the way
//! `edge_http::io::server::Handler` is dispatched, since a fixed, small,
//! closed set of response kinds is known up front and a sum type avoids a
//! vtable indirection on every `service()` call in the hot path.

use crate::error::Error;
use crate::file::{FileResponder, FileSystemChunker};
use crate::response::{ServiceOutcome, StatusResponder};
use crate::rest::{RestApiHandler, RestApiResponder};
use crate::sse::SseResponder;
use crate::transport::ClientTransport;
use crate::ws::WebSocketResponder;

pub enum Responder<F: FileSystemChunker, H: RestApiHandler> {
    RestApi(RestApiResponder<H>),
    File(FileResponder<F>),
    WebSocket(WebSocketResponder),
    Sse(SseResponder),
    /// A headers-only response with no body (404/400/503 paths).
    Status(StatusResponder),
}

impl<F: FileSystemChunker, H: RestApiHandler> Responder<F, H> {
    pub fn service<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        now_ms: u32,
    ) -> Result<ServiceOutcome, Error<T::Error>> {
        match self {
            Self::RestApi(r) => r.service(transport, now_ms),
            Self::File(r) => r.service(transport, now_ms),
            Self::WebSocket(r) => r.service(transport, now_ms),
            Self::Sse(r) => r.service(transport, now_ms),
            Self::Status(r) => r.service(transport, now_ms),
        }
    }

    /// `true` once this responder has transitioned to an upgraded,
    /// long-lived link (WebSocket or SSE) that the slot's idle/standard
    /// timeouts no longer apply to in the usual way (spec §4.3).
    pub fn is_upgraded(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::Sse(_))
    }

    /// Whether the most recent `service()` call on an upgraded responder
    /// observed a read or a write. REST/File/Status responders always report
    /// activity since every call progresses the response.
    pub fn had_activity(&self) -> bool {
        match self {
            Self::WebSocket(r) => r.had_activity(),
            Self::Sse(r) => r.had_activity(),
            Self::RestApi(_) | Self::File(_) | Self::Status(_) => true,
        }
    }

    /// The channel ID this responder was registered under, for upgraded
    /// links only — used to release the `ChannelTable` entry on close.
    pub fn channel_id(&self) -> Option<u32> {
        match self {
            Self::WebSocket(r) => Some(r.channel_id()),
            Self::Sse(r) => Some(r.channel_id()),
            Self::RestApi(_) | Self::File(_) | Self::Status(_) => None,
        }
    }

    /// Hands this responder bytes the header parser captured past the
    /// terminating blank line — the start of a body or of the first
    /// WebSocket frame, which arrived in the same read as the last header
    /// bytes and must not be dropped. A no-op for responders with no notion
    /// of a request body.
    pub fn seed<T: ClientTransport>(&mut self, transport: &mut T, bytes: &[u8]) -> Result<(), Error<T::Error>> {
        match self {
            Self::RestApi(r) => {
                r.seed_body(bytes);
                Ok(())
            }
            Self::WebSocket(r) => r.seed_recv(transport, bytes),
            Self::File(_) | Self::Sse(_) | Self::Status(_) => Ok(()),
        }
    }
}

/// What dispatching a fully-parsed request produces: either a responder to
/// install, or a bare status code for a routing/capacity failure that has no
/// body beyond the standard headers (spec §4.7's 503 on channel exhaustion,
/// an unmatched route's 404).
pub enum DispatchResult<F: FileSystemChunker, H: RestApiHandler> {
    Responder(Responder<F, H>),
    Status(u16),
}

impl<F: FileSystemChunker, H: RestApiHandler> DispatchResult<F, H> {
    pub fn into_responder(self) -> Responder<F, H> {
        match self {
            Self::Responder(r) => r,
            Self::Status(code) => Responder::Status(StatusResponder::new(code)),
        }
    }
}
