//! The accept loop (spec §4.1, component A).
//!
//! Runs on its own thread, as `edge_nal_std::Stack::bind` plus an
//! `accept().await` loop does for the teacher's async runtime — here spelled
//! out as a blocking `TcpListener::accept` loop on a dedicated thread instead
//! of a task, per spec §9's synchronous alternative. A bind or accept
//! failure is logged and retried after a fixed delay rather than
//! propagated, since a device that can't listen should keep trying rather
//! than exit (confirmed against `WEB_SERVER_SOCKET_RETRY_DELAY_MS` in the
//! original implementation, which is 1000 ms both there and here).
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

/// Delay before retrying a failed bind or a non-transient accept error.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Runs the accept loop until `handoff` returns `false`, binding to `port`
/// on all interfaces. `handoff` is called with each newly accepted stream
/// and returns whether the loop should keep running.
pub fn run(port: u16, mut handoff: impl FnMut(TcpStream) -> bool) {
    loop {
        let listener = match TcpListener::bind(("0.0.0.0", port)) {
            Ok(l) => l,
            Err(e) => {
                log::warn!("listener bind on port {port} failed: {e}, retrying");
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                continue;
            }
        };

        log::info!("listening on port {port}");

        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    log::debug!("accepted connection from {addr}");
                    if !handoff(stream) {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("accept failed: {e}, retrying");
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                    // A listener whose accept keeps failing (e.g. the
                    // underlying socket died) is rebound from scratch.
                    break;
                }
            }
        }
    }
}
