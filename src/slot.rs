//! The per-connection state machine (spec §4.3, component C).
//!
//! `edge_http::io::server::handle_connection` drives one connection
//! start-to-finish inside a single `async fn`; here the same sequence
//! (read headers, pick a responder, respond, close or upgrade) is spread
//! across repeated non-blocking `service()` calls instead, since the
//! service loop visits every slot once per round rather than awaiting one
//! connection to completion.

use crate::error::Error;
use crate::file::FileSystemChunker;
use crate::header::{ConnectionKind, RequestHeader};
use crate::response::{ServiceOutcome, StatusResponder};
use crate::responder::{DispatchResult, Responder};
use crate::rest::RestApiHandler;
use crate::transport::ClientTransport;

/// A plain (non-upgraded) request/response must complete within this many
/// milliseconds of being accepted, or the slot is forcibly closed.
pub const MAX_STD_CONN_DURATION_MS: u32 = 60 * 60_000;
/// An upgraded WebSocket/SSE link is closed if it sees no activity for this
/// long.
pub const MAX_CONN_IDLE_DURATION_MS: u32 = 60_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Free,
    ParsingHeaders,
    Dispatching,
    Responding,
    UpgradedPersistent,
    Closed,
}

/// What the slot did this round, for the manager's bookkeeping. `Closed`
/// carries the channel ID the slot was holding, if any, so the manager can
/// release it from the `ChannelTable`.
pub enum SlotEvent {
    Idle,
    Progressed,
    Closed(Option<u32>),
}

pub struct ConnectionSlot<T: ClientTransport, F: FileSystemChunker, H: RestApiHandler> {
    pub state: SlotState,
    transport: Option<T>,
    header: RequestHeader<16>,
    responder: Option<Responder<F, H>>,
    accepted_ms: u32,
    last_activity_ms: u32,
    in_buf: [u8; 1024],
    channel_id: Option<u32>,
    /// Bytes the header parser captured past the terminating blank line
    /// (the start of the body, or of the first WebSocket frame) that arrived
    /// in the same read as the last header bytes — fed to the responder once
    /// installed rather than dropped.
    seed: Vec<u8>,
}

impl<T: ClientTransport, F: FileSystemChunker, H: RestApiHandler> ConnectionSlot<T, F, H> {
    pub fn new() -> Self {
        Self {
            state: SlotState::Free,
            transport: None,
            header: RequestHeader::new(),
            responder: None,
            accepted_ms: 0,
            last_activity_ms: 0,
            in_buf: [0u8; 1024],
            channel_id: None,
            seed: Vec::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn claim(&mut self, transport: T, now_ms: u32) -> Result<(), Error<T::Error>> {
        let mut transport = transport;
        transport.setup()?;
        self.transport = Some(transport);
        self.header = RequestHeader::new();
        self.responder = None;
        self.channel_id = None;
        self.seed.clear();
        self.accepted_ms = now_ms;
        self.last_activity_ms = now_ms;
        self.state = SlotState::ParsingHeaders;
        Ok(())
    }

    /// The parsed header, once `state` has advanced past `ParsingHeaders`.
    pub fn header(&self) -> &RequestHeader<16> {
        &self.header
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.header.connection_kind()
    }

    /// Installs the responder chosen by the caller once dispatching
    /// decides what kind of request this is (spec's `getNewResponder`).
    pub fn install_responder(&mut self, responder: Responder<F, H>) {
        self.channel_id = responder.channel_id();
        self.responder = Some(responder);
        self.state = SlotState::Responding;
    }

    /// Installs a headers-only status response, for routing/parse failures
    /// that never produce a real responder (spec §4.3, §4.7).
    fn install_status_responder(&mut self, status: u16) {
        self.channel_id = None;
        self.responder = Some(Responder::Status(StatusResponder::new(status)));
        self.state = SlotState::Responding;
    }

    /// Clears the slot and returns the channel ID it was holding, if any, so
    /// the caller can release it from the `ChannelTable` (spec §3: "every
    /// live WebSocket Responder owns a unique entry; destruction releases
    /// it").
    fn close(&mut self) -> Option<u32> {
        let channel_id = self.channel_id.take();
        self.transport = None;
        self.responder = None;
        self.header = RequestHeader::new();
        self.state = SlotState::Free;
        channel_id
    }

    /// Drives this slot forward by one round. `dispatch` is called once the
    /// header is fully parsed and must return the responder (or bare status)
    /// to install.
    pub fn service(
        &mut self,
        now_ms: u32,
        dispatch: impl FnOnce(&RequestHeader<16>) -> DispatchResult<F, H>,
    ) -> SlotEvent {
        if self.state == SlotState::Free {
            return SlotEvent::Idle;
        }

        let timed_out = match self.state {
            SlotState::UpgradedPersistent => {
                crate::time::elapsed_at_least(self.last_activity_ms, now_ms, MAX_CONN_IDLE_DURATION_MS)
            }
            SlotState::Closed => false,
            _ => crate::time::elapsed_at_least(self.accepted_ms, now_ms, MAX_STD_CONN_DURATION_MS),
        };

        if timed_out {
            return SlotEvent::Closed(self.close());
        }

        let result = self.service_inner(now_ms, dispatch);

        match result {
            Ok(progressed) => {
                if progressed {
                    self.last_activity_ms = now_ms;
                }
                if self.state == SlotState::Closed {
                    SlotEvent::Closed(self.close())
                } else if progressed {
                    SlotEvent::Progressed
                } else {
                    SlotEvent::Idle
                }
            }
            Err(_) => SlotEvent::Closed(self.close()),
        }
    }

    fn service_inner(
        &mut self,
        now_ms: u32,
        dispatch: impl FnOnce(&RequestHeader<16>) -> DispatchResult<F, H>,
    ) -> Result<bool, Error<T::Error>> {
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;

        match self.state {
            SlotState::ParsingHeaders => match transport.read(&mut self.in_buf)? {
                crate::transport::ReadOutcome::Data(n) => {
                    match self.header.feed(&self.in_buf[..n]) {
                        Ok(done) => {
                            if done {
                                self.seed = self.header.take_trailing();
                                self.state = SlotState::Dispatching;
                            }
                        }
                        // A malformed request line, an unknown method, or too
                        // many headers gets a 400 rather than a silent close
                        // (spec §4.3 PARSING_HEADERS, §7).
                        Err(Error::InvalidHeaders)
                        | Err(Error::TooManyHeaders)
                        | Err(Error::TooLongHeaders) => {
                            self.install_status_responder(400);
                        }
                        Err(e) => return Err(e),
                    }
                    Ok(true)
                }
                crate::transport::ReadOutcome::WouldBlock => Ok(false),
                crate::transport::ReadOutcome::Closed => Err(Error::ConnectionClosed),
            },
            SlotState::Dispatching => {
                let mut responder = dispatch(&self.header).into_responder();
                let seed = std::mem::take(&mut self.seed);
                if !seed.is_empty() {
                    responder.seed(transport, &seed)?;
                }

                // Installed by hand (rather than via `install_responder`)
                // since that takes `&mut self` and `transport` above is
                // still a live reborrow of `self.transport`.
                self.channel_id = responder.channel_id();
                self.responder = Some(responder);
                self.state = SlotState::Responding;
                Ok(true)
            }
            SlotState::Responding => {
                let responder = self.responder.as_mut().ok_or(Error::InvalidState)?;
                match responder.service(transport, now_ms)? {
                    ServiceOutcome::Continue => Ok(true),
                    ServiceOutcome::Done => {
                        self.state = SlotState::Closed;
                        Ok(true)
                    }
                    ServiceOutcome::Upgraded => {
                        self.state = SlotState::UpgradedPersistent;
                        Ok(true)
                    }
                }
            }
            SlotState::UpgradedPersistent => {
                let responder = self.responder.as_mut().ok_or(Error::InvalidState)?;
                let outcome = responder.service(transport, now_ms)?;
                let activity = responder.had_activity();

                match outcome {
                    ServiceOutcome::Done => {
                        self.state = SlotState::Closed;
                        Ok(true)
                    }
                    _ => Ok(activity),
                }
            }
            SlotState::Free | SlotState::Closed => Ok(false),
        }
    }
}

impl<T: ClientTransport, F: FileSystemChunker, H: RestApiHandler> Default for ConnectionSlot<T, F, H> {
    fn default() -> Self {
        Self::new()
    }
}
