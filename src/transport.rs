//! Per-connection transport abstraction (spec §4.2, component B).
//!
//! `edge_nal_std`'s `TcpSocket` wraps a `std::net::TcpStream` behind
//! `async-io` so reads/writes yield to an executor; this crate runs its
//! service loop synchronously instead (spec §9's sanctioned alternative to
//! per-connection tasks), so `ClientTransport` wraps the same
//! `std::net::TcpStream` but in non-blocking mode and reports `WouldBlock`
//! back to the caller explicitly rather than hiding it behind `.await`.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::error::Error;

/// Outcome of a single non-blocking read attempt.
pub enum ReadOutcome {
    /// `n` bytes were read into the caller's buffer (`n` may be less than
    /// the buffer length; `0` only ever means the peer closed its write side).
    Data(usize),
    /// No data was available right now; the caller should retry later.
    WouldBlock,
    /// The peer closed the connection.
    Closed,
}

/// Outcome of a single write attempt (spec §9's tri-valued write result,
/// confirmed against `RdWebConnDefs.h`'s `RdWebConnSendRetVal`: `FAIL`,
/// `OK`, `EAGAIN`).
pub enum WriteOutcome {
    /// `n` bytes were accepted by the socket buffer.
    Sent(usize),
    /// The socket buffer is full; the caller should retry after a short delay.
    Eagain,
    /// The write failed outright; the connection must be torn down.
    Fail,
}

/// What a connection slot needs from its transport. A real deployment
/// implements this over whatever socket type its platform offers; `StdTransport`
/// is the `std::net::TcpStream`-backed implementation used on hosts with a
/// full standard library, matching the scope `edge-nal-std` covers for the teacher.
pub trait ClientTransport {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Called once when the slot claims this transport for a new connection.
    fn setup(&mut self) -> Result<(), Error<Self::Error>>;

    /// Attempt to read more bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, Error<Self::Error>>;

    /// Attempt to write `buf`. `max_retry_ms` bounds how long the
    /// implementation may block spin-retrying `WouldBlock` internally before
    /// giving up and returning `Eagain` to the caller (spec §9: 10 ms for
    /// header-line writes, 0 ms for body-chunk writes, confirmed against
    /// `RdWebConnection.cpp`'s `WEB_CONN_MAX_WRITE_RETRY_MS` granularity).
    fn write(&mut self, buf: &[u8], max_retry_ms: u32) -> WriteOutcome;

    /// Whether the underlying socket still looks usable.
    fn is_active(&self) -> bool;

    /// A small identifier for logging (e.g. the peer's address).
    fn client_id(&self) -> String;
}

/// `std::net::TcpStream`-backed transport for hosts with a full standard library.
pub struct StdTransport {
    stream: TcpStream,
    peer: String,
    active: bool,
}

impl StdTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());

        Ok(Self {
            stream,
            peer,
            active: true,
        })
    }
}

impl ClientTransport for StdTransport {
    type Error = io::Error;

    fn setup(&mut self) -> Result<(), Error<Self::Error>> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, Error<Self::Error>> {
        match self.stream.read(buf) {
            Ok(0) => {
                self.active = false;
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => {
                self.active = false;
                Err(Error::Io(e))
            }
        }
    }

    fn write(&mut self, buf: &[u8], max_retry_ms: u32) -> WriteOutcome {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(max_retry_ms as u64);

        loop {
            match self.stream.write(buf) {
                Ok(n) => return WriteOutcome::Sent(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if std::time::Instant::now() >= deadline {
                        return WriteOutcome::Eagain;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(_) => {
                    self.active = false;
                    return WriteOutcome::Fail;
                }
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn client_id(&self) -> String {
        self.peer.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn read_reports_would_block_with_no_data() {
        let (_client, server) = pair();
        let mut t = StdTransport::new(server).unwrap();

        let mut buf = [0u8; 16];
        assert!(matches!(t.read(&mut buf), Ok(ReadOutcome::WouldBlock)));
    }

    #[test]
    fn read_reports_data_once_written() {
        let (mut client, server) = pair();
        let mut t = StdTransport::new(server).unwrap();

        client.write_all(b"hello").unwrap();

        // Non-blocking read may need a brief moment for the kernel to
        // surface the bytes; retry a few times rather than sleeping fixed.
        let mut buf = [0u8; 16];
        let mut got = None;
        for _ in 0..1000 {
            if let Ok(ReadOutcome::Data(n)) = t.read(&mut buf) {
                got = Some(n);
                break;
            }
        }

        assert_eq!(got, Some(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn read_reports_closed_when_peer_shuts_down() {
        let (client, server) = pair();
        let mut t = StdTransport::new(server).unwrap();
        drop(client);

        let mut buf = [0u8; 16];
        let mut closed = false;
        for _ in 0..1000 {
            match t.read(&mut buf) {
                Ok(ReadOutcome::Closed) => {
                    closed = true;
                    break;
                }
                Ok(ReadOutcome::WouldBlock) => continue,
                Ok(ReadOutcome::Data(_)) => panic!("unexpected data"),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(closed);
        assert!(!t.is_active());
    }

    #[test]
    fn write_sends_data() {
        let (mut client, server) = pair();
        let mut t = StdTransport::new(server).unwrap();

        match t.write(b"hi", 10) {
            WriteOutcome::Sent(n) => assert_eq!(n, 2),
            _ => panic!("expected Sent"),
        }

        let mut buf = [0u8; 2];
        client.set_nonblocking(false).unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }
}
