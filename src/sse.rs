//! Server-Sent Events responder (component F).
//!
//! The response preamble and `data:`/`event:`/`id:` framing are ported from
//! `RdWebResponderSSEvents.cpp`'s `generateEventMessage`. That function reads
//! an undefined `pEvent` when building the `event:` line for a message with
//! no group name; this crate resolves the ambiguity by omitting the `event:`
//! line entirely when the group string is empty (spec §11/§9 Open Question),
//! rather than carrying the bug forward. `id:` is always emitted as the
//! current epoch second, matching the original unconditionally.
//!
//! Outbound buffering follows the same line-buffer idiom as
//! `other_examples`' SSE parser (`SseLineBuffer`): a message is assembled in
//! one `String` before being handed to the transport, rather than written
//! field-by-field, so a caller never observes a half-written event.

use crate::response::{PendingWrite, ServiceOutcome};
use crate::transport::ClientTransport;
use crate::ws::OutboundQueue;

/// The header block the original sends ahead of the event stream.
pub const SSE_PREAMBLE: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
Access-Control-Allow-Origin: *\r\n\
Accept-Ranges: none\r\n\
\r\n";

/// Formats one SSE message. `group` selects the `event:` line; an empty
/// group omits it rather than emitting a blank/undefined event name.
/// Field order is `id:`, `event:`, `data:`, each `\r\n`-terminated, matching
/// `generateEventMessage` (`RdWebResponderSSEvents.cpp:196-226`).
pub fn format_event(group: &str, data: &str, id_epoch_secs: u64) -> String {
    let mut out = String::new();

    out.push_str("id: ");
    out.push_str(&id_epoch_secs.to_string());
    out.push_str("\r\n");

    if !group.is_empty() {
        out.push_str("event: ");
        out.push_str(group);
        out.push_str("\r\n");
    }

    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push_str("\r\n");
    }

    out.push_str("\r\n");

    out
}

pub struct SseResponder {
    channel_id: u32,
    outbound: OutboundQueue,
    preamble_sent: bool,
    closed: bool,
    had_activity: bool,
    pending: PendingWrite,
}

impl SseResponder {
    pub fn new(channel_id: u32, outbound: OutboundQueue) -> Self {
        Self {
            channel_id,
            outbound,
            preamble_sent: false,
            closed: false,
            had_activity: false,
            pending: PendingWrite::new(),
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Whether the most recent `service()` call observed a read or a write.
    pub fn had_activity(&self) -> bool {
        self.had_activity
    }

    pub fn service<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        _now_ms: u32,
    ) -> Result<ServiceOutcome, crate::error::Error<T::Error>> {
        self.had_activity = false;

        if !self.preamble_sent {
            crate::response::write_all(transport, SSE_PREAMBLE.as_bytes(), crate::response::HEADER_WRITE_RETRY_MS)?;
            self.preamble_sent = true;
            self.had_activity = true;
        }

        // SSE is a one-way stream; a short read is still attempted so a
        // client-initiated close is noticed promptly.
        let mut scratch = [0u8; 64];
        match transport.read(&mut scratch) {
            Ok(crate::transport::ReadOutcome::Closed) => {
                self.closed = true;
                self.had_activity = true;
            }
            Ok(_) => {}
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

        if self.closed && self.pending.is_empty() {
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
    fn omits_event_line_when_group_empty() {
        let msg = format_event("", "hello", 1234);
        assert!(!msg.contains("event:"));
        assert!(msg.starts_with("id: 1234\r\n"));
        assert!(msg.ends_with("data: hello\r\n\r\n"));
    }

    #[test]
    fn includes_event_line_when_group_present() {
        let msg = format_event("temperature", "23.5", 1234);
        assert!(msg.starts_with("id: 1234\r\nevent: temperature\r\ndata: 23.5\r\n"));
    }

    #[test]
    fn multiline_data_gets_one_data_line_each() {
        let msg = format_event("log", "line1\nline2", 1);
        assert_eq!(msg.matches("data: ").count(), 2);
    }

    #[test]
    fn preamble_includes_cors_and_accept_ranges() {
        assert!(SSE_PREAMBLE.contains("Access-Control-Allow-Origin: *"));
        assert!(SSE_PREAMBLE.contains("Accept-Ranges: none"));
    }
}
