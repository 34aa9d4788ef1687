//! The recognized configuration fields (spec §6).
//!
//! Loading a `Config` from a file, environment, or provisioning protocol is a
//! host concern (out of scope, §1); this module only owns the shape of the
//! data and its defaults, the way `edge_http::io::server` owns
//! `DEFAULT_BUF_SIZE` / `DEFAULT_HANDLER_TASKS_COUNT` as module constants
//! rather than a config-loading layer.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// TCP port the listener binds to.
    pub server_tcp_port: u16,
    /// Maximum number of concurrent connection slots.
    pub num_conn_slots: usize,
    /// Whether the WebSocket handler is registered.
    pub enable_web_sockets: bool,
    /// Ping interval for live WebSocket links, in milliseconds. `0` disables pings.
    pub ping_interval_ms: u32,
    /// Whether the static-file handler is registered.
    pub enable_file_server: bool,
    /// Scheduling hint: which CPU core to pin the service task to, if the runtime supports it.
    pub task_core: Option<u32>,
    /// Scheduling hint: task priority, if the runtime supports it.
    pub task_priority: Option<u32>,
    /// Scheduling hint: stack size reserved for the service task, in bytes.
    pub task_stack_size: usize,
    /// Per-write cap, in bytes, applied to every `Transport::write`/chunked read.
    pub send_buffer_max_len: usize,
    /// Source identifier reported to REST endpoints.
    pub rest_api_channel_id: u32,
}

impl Config {
    pub const DEFAULT_SERVER_TCP_PORT: u16 = 80;
    pub const DEFAULT_NUM_CONN_SLOTS: usize = 6;
    pub const DEFAULT_PING_INTERVAL_MS: u32 = 1000;
    pub const DEFAULT_TASK_STACK_SIZE: usize = 3000;
    pub const DEFAULT_SEND_BUFFER_MAX_LEN: usize = 1000;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_tcp_port: Self::DEFAULT_SERVER_TCP_PORT,
            num_conn_slots: Self::DEFAULT_NUM_CONN_SLOTS,
            enable_web_sockets: true,
            ping_interval_ms: Self::DEFAULT_PING_INTERVAL_MS,
            enable_file_server: true,
            task_core: None,
            task_priority: None,
            task_stack_size: Self::DEFAULT_TASK_STACK_SIZE,
            send_buffer_max_len: Self::DEFAULT_SEND_BUFFER_MAX_LEN,
            rest_api_channel_id: 0,
        }
    }
}

/// Per-WebSocket-handler configuration (spec §6).
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WsHandlerConfig {
    /// URL prefix this handler matches, e.g. `"ws"`.
    pub prefix: String,
    /// Maximum number of simultaneous WebSocket connections this handler will accept.
    pub max_conn: usize,
    /// Per-message size cap, in bytes.
    pub pkt_max_bytes: usize,
    /// Outbound queue depth.
    pub tx_queue_max: usize,
}

impl WsHandlerConfig {
    pub const DEFAULT_PKT_MAX_BYTES: usize = 5000;
    pub const DEFAULT_TX_QUEUE_MAX: usize = 2;
}

impl Default for WsHandlerConfig {
    fn default() -> Self {
        Self {
            prefix: "ws".into(),
            max_conn: 4,
            pkt_max_bytes: Self::DEFAULT_PKT_MAX_BYTES,
            tx_queue_max: Self::DEFAULT_TX_QUEUE_MAX,
        }
    }
}
