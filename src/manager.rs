//! The connection manager: owns the slot pool, the registered handler list,
//! and the channel-ID table used to address upgraded WebSocket/SSE links
//! from host code (spec §4, component "G").
//!
//! `edge_http::io::server::Server` owns one `Handler` and one buffer shared
//! across however many connections its executor interleaves; this manager
//! instead owns a fixed-size `Vec` of slots sized once from `Config` and a
//! small ordered list of URL-prefix handlers, since the spec's dispatch is a
//! first-match-wins prefix table rather than a single top-level handler.

use std::sync::Arc;

use crate::config::{Config, WsHandlerConfig};
use crate::file::FileSystemChunker;
use crate::header::ConnectionKind;
use crate::responder::{DispatchResult, Responder};
use crate::rest::RestApiHandler;
use crate::sse::SseResponder;
use crate::slot::{ConnectionSlot, SlotEvent};
use crate::transport::ClientTransport;
use crate::ws::{new_outbound_queue, OutboundQueue, WebSocketResponder, WsMessageHandler};

/// Registry of channel IDs handed out to upgraded links, so host code can
/// address a specific WebSocket or SSE connection later (spec §4.7).
pub struct ChannelTable {
    in_use: Vec<bool>,
    queues: Vec<Option<OutboundQueue>>,
}

impl ChannelTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            in_use: vec![false; capacity],
            queues: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Claims the first free channel ID and associates it with `queue`.
    pub fn acquire(&mut self, queue: OutboundQueue) -> Option<u32> {
        let idx = self.in_use.iter().position(|used| !used)?;
        self.in_use[idx] = true;
        self.queues[idx] = Some(queue);
        Some(idx as u32)
    }

    pub fn release(&mut self, channel_id: u32) {
        if let Some(slot) = self.in_use.get_mut(channel_id as usize) {
            *slot = false;
            self.queues[channel_id as usize] = None;
        }
    }

    pub fn can_send(&self, channel_id: u32) -> bool {
        self.in_use.get(channel_id as usize).copied().unwrap_or(false)
    }

    pub fn queue(&self, channel_id: u32) -> Option<&OutboundQueue> {
        self.queues.get(channel_id as usize)?.as_ref()
    }

    /// All currently-live channel IDs, for broadcast sends.
    pub fn live_channels(&self) -> impl Iterator<Item = u32> + '_ {
        self.in_use
            .iter()
            .enumerate()
            .filter(|(_, used)| **used)
            .map(|(i, _)| i as u32)
    }
}

/// Everything the manager needs to construct a responder for a freshly
/// dispatched request. Kept as a small factory trait rather than trait
/// objects per-connection, since `F` and `H` are fixed for the lifetime of
/// one manager.
pub trait ResponderFactory<F: FileSystemChunker, H: RestApiHandler> {
    fn new_file_fs(&self) -> F;
    fn new_rest_handler(&self) -> H;
    fn file_default_path(&self) -> &str;
    fn file_url_prefix(&self) -> &str;
    fn rest_url_prefix(&self) -> &str;
    fn ws_config(&self) -> &WsHandlerConfig;
    /// The host's inbound-message sink for live WebSocket links (spec
    /// §4.4.3's `rxMsgCB`).
    fn ws_message_handler(&self) -> Arc<dyn WsMessageHandler>;
}

pub struct ConnectionManager<T, F, H, R>
where
    T: ClientTransport,
    F: FileSystemChunker,
    H: RestApiHandler,
    R: ResponderFactory<F, H>,
{
    slots: Vec<ConnectionSlot<T, F, H>>,
    channels: ChannelTable,
    config: Config,
    factory: R,
}

impl<T, F, H, R> ConnectionManager<T, F, H, R>
where
    T: ClientTransport,
    F: FileSystemChunker,
    H: RestApiHandler,
    R: ResponderFactory<F, H>,
{
    pub fn new(config: Config, factory: R) -> Self {
        let num_slots = config.num_conn_slots;
        let channel_capacity = factory.ws_config().max_conn + 4;

        Self {
            slots: (0..num_slots).map(|_| ConnectionSlot::new()).collect(),
            channels: ChannelTable::new(channel_capacity),
            config,
            factory,
        }
    }

    /// Finds a free slot and claims it for `transport`, or drops the
    /// connection if the pool is saturated (spec §4.1: a full pool rejects
    /// new connections rather than queuing them).
    pub fn accept(&mut self, transport: T, now_ms: u32) -> bool {
        for slot in &mut self.slots {
            if slot.is_free() {
                let _ = slot.claim(transport, now_ms);
                return true;
            }
        }
        false
    }

    /// Visits every slot once, advancing whichever ones have work to do.
    /// Returns the number of slots that made progress this round.
    pub fn service_round(&mut self, now_ms: u32) -> usize {
        let mut progressed = 0;

        for slot in &mut self.slots {
            let kind = slot.connection_kind();
            let channels = &mut self.channels;
            let factory = &self.factory;
            let config = &self.config;

            let event = slot.service(now_ms, |header| {
                Self::dispatch(header, kind, factory, config, channels, now_ms)
            });

            match event {
                SlotEvent::Progressed => progressed += 1,
                SlotEvent::Closed(Some(channel_id)) => self.channels.release(channel_id),
                SlotEvent::Closed(None) | SlotEvent::Idle => {}
            }
        }

        progressed
    }

    fn dispatch(
        header: &crate::header::RequestHeader<16>,
        kind: ConnectionKind,
        factory: &R,
        config: &Config,
        channels: &mut ChannelTable,
        now_ms: u32,
    ) -> DispatchResult<F, H> {
        match kind {
            ConnectionKind::WebSocket if config.enable_web_sockets => {
                let Some(ws_key) = header.ws_key() else {
                    return DispatchResult::Status(400);
                };
                let ws_cfg = factory.ws_config();
                let queue = new_outbound_queue();

                let Some(channel_id) = channels.acquire(queue.clone()) else {
                    // Spec §4.7: channel-ID exhaustion answers 503 rather than
                    // building a responder with a bogus address.
                    return DispatchResult::Status(503);
                };

                DispatchResult::Responder(Responder::WebSocket(WebSocketResponder::new(
                    channel_id,
                    queue,
                    ws_cfg.tx_queue_max,
                    ws_cfg.pkt_max_bytes,
                    config.ping_interval_ms,
                    now_ms,
                    ws_key.to_string(),
                    factory.ws_message_handler(),
                )))
            }
            ConnectionKind::Event => {
                let queue = new_outbound_queue();
                let Some(channel_id) = channels.acquire(queue.clone()) else {
                    return DispatchResult::Status(503);
                };
                DispatchResult::Responder(Responder::Sse(SseResponder::new(channel_id, queue)))
            }
            _ if header.url.starts_with(factory.rest_url_prefix()) => DispatchResult::Responder(
                Responder::RestApi(crate::rest::RestApiResponder::new(factory.new_rest_handler(), header)),
            ),
            _ if config.enable_file_server => {
                let path = crate::file::resolve_default(&header.url, factory.file_default_path()).to_string();
                let accepts_gzip = header
                    .headers
                    .get("Accept-Encoding")
                    .map(|v| v.contains("gzip"))
                    .unwrap_or(false);
                DispatchResult::Responder(Responder::File(crate::file::FileResponder::new(
                    factory.new_file_fs(),
                    path,
                    accepts_gzip,
                )))
            }
            // No registered handler claims this URL (spec §4.3/§9): answer
            // 404 rather than silently falling through to the REST handler.
            _ => DispatchResult::Status(404),
        }
    }

    /// Enqueues `frame` for delivery on `channel_id` (spec's `sendMsg`).
    /// Returns `false` if the channel isn't live.
    pub fn send_msg(&self, channel_id: u32, frame: Vec<u8>, max_queue_len: usize) -> bool {
        match self.channels.queue(channel_id) {
            Some(q) => crate::ws::enqueue(q, frame, max_queue_len),
            None => false,
        }
    }

    pub fn can_send(&self, channel_id: u32) -> bool {
        self.channels.can_send(channel_id)
    }

    /// Broadcasts an SSE event to every live channel (spec's
    /// `serverSideEventsSendMsg` with no specific channel named).
    pub fn broadcast_sse(&self, group: &str, data: &str, id_epoch_secs: u64, max_queue_len: usize) {
        let msg = crate::sse::format_event(group, data, id_epoch_secs);
        for channel_id in self.channels.live_channels() {
            self.send_msg(channel_id, msg.clone().into_bytes(), max_queue_len);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_table_acquire_and_release() {
        let mut table = ChannelTable::new(2);
        let q1 = new_outbound_queue();
        let q2 = new_outbound_queue();

        let a = table.acquire(q1).unwrap();
        let b = table.acquire(q2).unwrap();
        assert_ne!(a, b);
        assert!(table.acquire(new_outbound_queue()).is_none());

        table.release(a);
        assert!(table.acquire(new_outbound_queue()).is_some());
    }

    #[test]
    fn live_channels_lists_only_acquired() {
        let mut table = ChannelTable::new(3);
        let id = table.acquire(new_outbound_queue()).unwrap();
        let live: Vec<u32> = table.live_channels().collect();
        assert_eq!(live, vec![id]);
    }
}
