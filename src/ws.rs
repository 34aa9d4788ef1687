//! RFC 6455 WebSocket framing and the WebSocket responder (component E).
//!
//! The frame header layout is ported from `edge_ws::FrameHeader` (same bit
//! positions, same opcode table); the queueing and liveness logic is new,
//! grounded on the shape of `asynch::ws_channel`'s sender/receiver split but
//! using a `Mutex<VecDeque<_>>` instead of `embassy_sync::channel::Channel`,
//! because the outbound queue depth here is a runtime `Config` value
//! (`WsHandlerConfig::tx_queue_max`) rather than a const generic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::response::{PendingWrite, ServiceOutcome, StdHeaderGuard};
use crate::transport::ClientTransport;

/// Host-side delivery of decoded inbound WebSocket messages (spec §4.4.3's
/// `rxMsgCB(channelID, buf, len)`).
pub trait WsMessageHandler: Send + Sync {
    fn on_message(&self, channel_id: u32, data: &[u8]);
}

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut buf = String::with_capacity(client_key.len() + WS_GUID.len());
    buf.push_str(client_key);
    buf.push_str(WS_GUID);

    let digest = sha1_smol::Sha1::from(buf.as_bytes()).digest().bytes();
    base64::encode(digest)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameType {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl FrameType {
    fn opcode(&self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xa,
        }
    }

    fn from_opcode(op: u8) -> Option<Self> {
        match op {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xa => Some(Self::Pong),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FrameHeader {
    pub fin: bool,
    pub frame_type: FrameType,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Parses a frame header from the front of `buf`. Returns the header
    /// and how many bytes it occupied, or `None` if `buf` doesn't yet
    /// contain a full header (the caller should read more and retry).
    pub fn parse(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < 2 {
            return None;
        }

        let fin = buf[0] & 0x80 != 0;
        let opcode = buf[0] & 0x0f;
        let frame_type = FrameType::from_opcode(opcode)?;

        let masked = buf[1] & 0x80 != 0;
        let len7 = buf[1] & 0x7f;

        let (payload_len, mut pos): (u64, usize) = if len7 < 126 {
            (len7 as u64, 2)
        } else if len7 == 126 {
            if buf.len() < 4 {
                return None;
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        } else {
            if buf.len() < 10 {
                return None;
            }
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(arr), 10)
        };

        let mask = if masked {
            if buf.len() < pos + 4 {
                return None;
            }
            let mut m = [0u8; 4];
            m.copy_from_slice(&buf[pos..pos + 4]);
            pos += 4;
            Some(m)
        } else {
            None
        };

        Some((
            Self {
                fin,
                frame_type,
                mask,
                payload_len,
            },
            pos,
        ))
    }

    /// Serializes a server-to-client frame header (always unmasked, per RFC 6455 §5.1).
    pub fn serialize_unmasked(fin: bool, frame_type: FrameType, payload_len: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        out.push((if fin { 0x80 } else { 0 }) | frame_type.opcode());

        if payload_len < 126 {
            out.push(payload_len as u8);
        } else if payload_len <= u16::MAX as u64 {
            out.push(126);
            out.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&payload_len.to_be_bytes());
        }

        out
    }

    /// Unmasks `payload` in place using this header's mask key, if any.
    pub fn unmask(&self, payload: &mut [u8]) {
        if let Some(mask) = self.mask {
            for (i, b) in payload.iter_mut().enumerate() {
                *b ^= mask[i % 4];
            }
        }
    }
}

/// Builds a complete unmasked server frame for `payload`.
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let mut out = FrameHeader::serialize_unmasked(true, frame_type, payload.len() as u64);
    out.extend_from_slice(payload);
    out
}

/// The state machine driving one upgraded WebSocket link (spec §4.3's
/// UPGRADED_PERSISTENT state, specialized for WS).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LinkState {
    Open,
    Closing,
    Closed,
}

/// Bounded outbound frame queue shared between the responder and whatever
/// host code calls `ConnectionManager::send_msg` (spec §4.7).
pub type OutboundQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;

pub fn new_outbound_queue() -> OutboundQueue {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Pushes `frame` onto `queue`, dropping the oldest entry if `max_len` would
/// be exceeded (spec §4.7: a full outbound queue is lossy, not blocking).
pub fn enqueue(queue: &OutboundQueue, frame: Vec<u8>, max_len: usize) -> bool {
    let mut q = queue.lock().unwrap();
    if q.len() >= max_len {
        q.pop_front();
    }
    q.push_back(frame);
    true
}

pub struct WebSocketResponder {
    channel_id: u32,
    outbound: OutboundQueue,
    max_queue_len: usize,
    max_frame_len: usize,
    state: LinkState,
    last_ping_ms: u32,
    ping_interval_ms: u32,
    recv_buf: Vec<u8>,
    in_buf: [u8; 4096],
    had_activity: bool,
    client_key: String,
    handshake_sent: bool,
    guard: StdHeaderGuard,
    on_message: Arc<dyn WsMessageHandler>,
    pending: PendingWrite,
}

impl WebSocketResponder {
    pub fn new(
        channel_id: u32,
        outbound: OutboundQueue,
        max_queue_len: usize,
        max_frame_len: usize,
        ping_interval_ms: u32,
        now_ms: u32,
        client_key: String,
        on_message: Arc<dyn WsMessageHandler>,
    ) -> Self {
        Self {
            channel_id,
            outbound,
            max_queue_len,
            max_frame_len,
            state: LinkState::Open,
            last_ping_ms: now_ms,
            ping_interval_ms,
            recv_buf: Vec::new(),
            in_buf: [0u8; 4096],
            had_activity: false,
            client_key,
            handshake_sent: false,
            guard: StdHeaderGuard::new(),
            on_message,
            pending: PendingWrite::new(),
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Feeds in bytes the header parser already read past the terminating
    /// blank line — the start of the first WebSocket frame, present in the
    /// same read that completed the upgrade handshake request.
    pub fn seed_recv<T: ClientTransport>(&mut self, transport: &mut T, bytes: &[u8]) -> Result<(), Error<T::Error>> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.recv_buf.extend_from_slice(bytes);
        self.drain_frames(transport)
    }

    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    /// Whether the most recent `service()` call observed a read or a write,
    /// as opposed to finding nothing to do (used by the slot to decide
    /// whether the idle timeout clock should reset).
    pub fn had_activity(&self) -> bool {
        self.had_activity
    }

    fn drain_frames<T: ClientTransport>(&mut self, transport: &mut T) -> Result<(), Error<T::Error>> {
        loop {
            let Some((header, consumed)) = FrameHeader::parse(&self.recv_buf) else {
                return Ok(());
            };

            // Checked against the declared length before the payload is
            // buffered, not after: otherwise a client can declare an
            // oversized `payload_len` and grow `recv_buf` unbounded while
            // this waits for bytes that may never come.
            if header.payload_len as usize > self.max_frame_len {
                self.state = LinkState::Closing;
                self.recv_buf.clear();
                return Ok(());
            }

            let total = consumed + header.payload_len as usize;
            if self.recv_buf.len() < total {
                return Ok(());
            }

            let mut payload = self.recv_buf[consumed..total].to_vec();
            header.unmask(&mut payload);
            self.recv_buf.drain(0..total);

            match header.frame_type {
                FrameType::Ping => {
                    enqueue(
                        &self.outbound,
                        build_frame(FrameType::Pong, &payload),
                        self.max_queue_len,
                    );
                }
                FrameType::Close => {
                    self.state = LinkState::Closing;
                    enqueue(
                        &self.outbound,
                        build_frame(FrameType::Close, &[]),
                        self.max_queue_len,
                    );
                }
                FrameType::Pong => {}
                FrameType::Text | FrameType::Binary | FrameType::Continuation => {
                    self.on_message.on_message(self.channel_id, &payload);
                }
            }
        }
    }

    pub fn service<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        now_ms: u32,
    ) -> Result<ServiceOutcome, Error<T::Error>> {
        self.had_activity = false;

        if !self.handshake_sent {
            let accept = accept_key(&self.client_key);
            self.guard.send(
                transport,
                101,
                &[
                    ("Upgrade", "websocket"),
                    ("Sec-WebSocket-Accept", &accept),
                ],
                None,
                "Upgrade",
            )?;
            self.handshake_sent = true;
            self.had_activity = true;
            return Ok(ServiceOutcome::Upgraded);
        }

        if self.ping_interval_ms > 0
            && crate::time::elapsed_at_least(self.last_ping_ms, now_ms, self.ping_interval_ms)
        {
            enqueue(&self.outbound, build_frame(FrameType::Ping, &[]), self.max_queue_len);
            self.last_ping_ms = now_ms;
        }

        match transport.read(&mut self.in_buf) {
            Ok(crate::transport::ReadOutcome::Data(n)) => {
                self.recv_buf.extend_from_slice(&self.in_buf[..n]);
                self.drain_frames(transport)?;
                self.had_activity = true;
            }
            Ok(crate::transport::ReadOutcome::WouldBlock) => {}
            Ok(crate::transport::ReadOutcome::Closed) => {
                self.state = LinkState::Closed;
                self.had_activity = true;
            }
            Err(e) => return Err(e),
        }

        if self.pending.is_empty() {
            let next = {
                let mut q = self.outbound.lock().unwrap();
                q.pop_front()
            };
            if let Some(frame) = next {
                self.pending.set(frame);
            }
        }

        if !self.pending.is_empty() {
            let flushed = self.pending.try_flush(transport)?;
            self.had_activity = true;
            if !flushed {
                return Ok(ServiceOutcome::Upgraded);
            }
        }

        if self.state == LinkState::Closing && self.outbound.lock().unwrap().is_empty() && self.pending.is_empty() {
            self.state = LinkState::Closed;
        }

        if self.state == LinkState::Closed {
            Ok(ServiceOutcome::Done)
        } else {
            Ok(ServiceOutcome::Upgraded)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The canonical example from RFC 6455 §1.3.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn frame_header_roundtrip_small_payload() {
        let header_bytes = FrameHeader::serialize_unmasked(true, FrameType::Text, 5);
        let mut full = header_bytes.clone();
        full.extend_from_slice(b"hello");

        let (parsed, consumed) = FrameHeader::parse(&full).unwrap();
        assert_eq!(consumed, header_bytes.len());
        assert_eq!(parsed.payload_len, 5);
        assert_eq!(parsed.frame_type, FrameType::Text);
        assert!(parsed.mask.is_none());
    }

    #[test]
    fn frame_header_parse_needs_more_data() {
        assert!(FrameHeader::parse(&[0x81]).is_none());
    }

    #[test]
    fn masked_client_frame_unmask_roundtrip() {
        let mask = [1, 2, 3, 4];
        let mut payload = b"abcd".to_vec();
        let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect();

        let header = FrameHeader {
            fin: true,
            frame_type: FrameType::Binary,
            mask: Some(mask),
            payload_len: 4,
        };

        let mut round = masked.clone();
        header.unmask(&mut round);
        assert_eq!(round, payload);
        payload.clear();
    }

    #[test]
    fn oversized_declared_frame_closes_without_buffering_payload() {
        struct Sink;
        impl WsMessageHandler for Sink {
            fn on_message(&self, _channel_id: u32, _data: &[u8]) {
                panic!("should not be reached for an oversized frame");
            }
        }

        let mut responder = WebSocketResponder::new(
            0,
            new_outbound_queue(),
            4,
            16,
            0,
            0,
            "key".to_string(),
            Arc::new(Sink),
        );

        // Header declares a 1000-byte payload but only the header itself
        // has arrived; max_frame_len is 16.
        let header_bytes = FrameHeader::serialize_unmasked(true, FrameType::Binary, 1000);
        responder.recv_buf.extend_from_slice(&header_bytes);

        struct NullTransport;
        impl ClientTransport for NullTransport {
            type Error = std::io::Error;
            fn setup(&mut self) -> Result<(), Error<Self::Error>> {
                Ok(())
            }
            fn read(&mut self, _buf: &mut [u8]) -> Result<crate::transport::ReadOutcome, Error<Self::Error>> {
                Ok(crate::transport::ReadOutcome::WouldBlock)
            }
            fn write(&mut self, _buf: &[u8], _retry_ms: u32) -> crate::transport::WriteOutcome {
                crate::transport::WriteOutcome::Sent(0)
            }
            fn is_active(&self) -> bool {
                true
            }
            fn client_id(&self) -> String {
                "null".to_string()
            }
        }

        let mut transport = NullTransport;
        responder.drain_frames(&mut transport).unwrap();

        assert_eq!(responder.state, LinkState::Closing);
        assert!(responder.recv_buf.is_empty());
    }

    #[test]
    fn seed_recv_drains_a_frame_present_before_the_first_read() {
        struct Collector(Mutex<Vec<Vec<u8>>>);
        impl WsMessageHandler for Collector {
            fn on_message(&self, _channel_id: u32, data: &[u8]) {
                self.0.lock().unwrap().push(data.to_vec());
            }
        }

        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        let mut responder = WebSocketResponder::new(
            0,
            new_outbound_queue(),
            4,
            4096,
            0,
            0,
            "key".to_string(),
            collector.clone(),
        );

        struct NullTransport;
        impl ClientTransport for NullTransport {
            type Error = std::io::Error;
            fn setup(&mut self) -> Result<(), Error<Self::Error>> {
                Ok(())
            }
            fn read(&mut self, _buf: &mut [u8]) -> Result<crate::transport::ReadOutcome, Error<Self::Error>> {
                Ok(crate::transport::ReadOutcome::WouldBlock)
            }
            fn write(&mut self, _buf: &[u8], _retry_ms: u32) -> crate::transport::WriteOutcome {
                crate::transport::WriteOutcome::Sent(0)
            }
            fn is_active(&self) -> bool {
                true
            }
            fn client_id(&self) -> String {
                "null".to_string()
            }
        }

        let mut transport = NullTransport;
        let frame = build_frame(FrameType::Text, b"hi");
        responder.seed_recv(&mut transport, &frame).unwrap();

        assert_eq!(collector.0.lock().unwrap().as_slice(), &[b"hi".to_vec()]);
    }

    #[test]
    fn extended_length_16_bit() {
        let payload_len = 300u64;
        let header_bytes = FrameHeader::serialize_unmasked(true, FrameType::Binary, payload_len);
        assert_eq!(header_bytes[1], 126);

        let (parsed, consumed) = FrameHeader::parse(&header_bytes).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(parsed.payload_len, payload_len);
    }
}
