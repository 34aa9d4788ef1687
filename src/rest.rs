//! REST API responder (component G).
//!
//! Dispatch is a callback contract rather than a routing table, mirroring
//! `RdWebResponderRestAPI.cpp`: the host registers a function for a URL
//! prefix and gets called with the parsed request, a raw body, or a stream
//! of multipart chunks, and answers with a JSON body built elsewhere. CRC of
//! multipart chunks is carried through as a best-effort signal the host may
//! act on, not a condition this responder enforces.

use crate::error::Error;
use crate::header::{Method, RequestHeader};
use crate::response::{PendingWrite, ServiceOutcome, StdHeaderGuard};
use crate::transport::ClientTransport;

/// What the host returns from a simple (non-multipart, non-streamed) REST call.
pub struct RestApiResult {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl RestApiResult {
    pub fn json(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "text/json",
            body: body.into(),
        }
    }
}

/// One chunk of a multipart body, as handed to the host's chunk callback.
pub struct MultipartChunk<'a> {
    pub field_name: &'a str,
    /// The part's `filename` attribute, if `Content-Disposition` carried one
    /// (present for file-upload fields, absent for plain form fields).
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
    pub is_final: bool,
    /// Best-effort: `false` only if the trailing CRC explicitly failed to
    /// match, never a reason by itself to abort the upload.
    pub crc_ok: bool,
}

/// Host-side handler contract for one registered REST API prefix.
pub trait RestApiHandler {
    /// Whether the handler can accept a request right now (spec's
    /// `restApiFnIsReady`) — lets the host apply backpressure, e.g. while a
    /// firmware update is already in progress.
    fn is_ready(&self) -> bool {
        true
    }

    /// A simple request with a fully-buffered (non-multipart) body.
    fn call(&mut self, method: Method, url: &str, query: &str, body: &[u8]) -> RestApiResult;

    /// Called once per multipart chunk, in order, for multipart uploads.
    /// The final call in a given upload sets `is_final`.
    fn call_chunk(&mut self, url: &str, chunk: MultipartChunk<'_>) -> Option<RestApiResult> {
        let _ = (url, chunk);
        None
    }
}

enum Phase {
    ReadingBody,
    ReadingMultipart,
    Responding,
    Done,
}

pub struct RestApiResponder<H: RestApiHandler> {
    handler: H,
    method: Method,
    url: String,
    query: String,
    content_length: Option<u64>,
    boundary: Option<String>,
    body: Vec<u8>,
    phase: Phase,
    guard: StdHeaderGuard,
    result: Option<RestApiResult>,
    pending: PendingWrite,
    expect_continue: bool,
    continue_sent: bool,
    in_buf: [u8; 2048],
}

impl<H: RestApiHandler> RestApiResponder<H> {
    pub fn new<const N: usize>(handler: H, header: &RequestHeader<N>) -> Self {
        let multipart = header.is_multipart();
        Self {
            handler,
            method: header.method.unwrap_or(Method::Get),
            url: header.url.clone(),
            query: header.query.clone(),
            content_length: header.content_length(),
            boundary: if multipart { header.multipart_boundary() } else { None },
            body: Vec::new(),
            phase: if multipart { Phase::ReadingMultipart } else { Phase::ReadingBody },
            guard: StdHeaderGuard::new(),
            result: None,
            pending: PendingWrite::new(),
            expect_continue: header.is_expect_continue(),
            continue_sent: false,
            in_buf: [0u8; 2048],
        }
    }

    fn expected_len(&self) -> u64 {
        self.content_length.unwrap_or(0)
    }

    /// Feeds in body bytes the header parser already read past the
    /// terminating blank line, before this responder's own reads begin.
    pub fn seed_body(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.body.extend_from_slice(bytes);
        if matches!(self.phase, Phase::ReadingMultipart) {
            self.drain_multipart_parts();
        }
    }

    fn dispatch_simple(&mut self) {
        let res = self.handler.call(self.method, &self.url, &self.query, &self.body);
        self.result = Some(res);
        self.phase = Phase::Responding;
    }

    /// Splits accumulated multipart body bytes on the boundary and forwards
    /// each part to the host as it completes. A minimal splitter: parts are
    /// separated by `--boundary\r\n`, terminated by `--boundary--`.
    fn drain_multipart_parts(&mut self) {
        let Some(boundary) = self.boundary.clone() else {
            return;
        };
        let marker = format!("--{boundary}");

        while let Some(start) = find(&self.body, marker.as_bytes()) {
            let after_marker = start + marker.len();
            if self.body.len() < after_marker + 2 {
                return;
            }

            if &self.body[after_marker..after_marker + 2] == b"--" {
                self.body.drain(0..self.body.len().min(after_marker + 2));
                let res = self.handler.call_chunk(
                    &self.url,
                    MultipartChunk {
                        field_name: "",
                        filename: None,
                        data: &[],
                        is_final: true,
                        crc_ok: true,
                    },
                );
                if let Some(res) = res {
                    self.result = Some(res);
                }
                self.phase = Phase::Responding;
                return;
            }

            let Some(next) = find(&self.body[after_marker..], marker.as_bytes()) else {
                return;
            };
            let part_end = after_marker + next;
            let part = self.body[after_marker..part_end].to_vec();
            self.body.drain(0..part_end);

            let (headers, data) = match find(&part, b"\r\n\r\n") {
                Some(idx) => (&part[..idx], &part[idx + 4..]),
                None => (&part[..], &[][..]),
            };

            let (field_name, filename) = extract_content_disposition(headers);
            let field_name = field_name.unwrap_or_default();
            let data = data.strip_suffix(b"\r\n").unwrap_or(data);

            let res = self.handler.call_chunk(
                &self.url,
                MultipartChunk {
                    field_name: &field_name,
                    filename: filename.as_deref(),
                    data,
                    is_final: false,
                    crc_ok: true,
                },
            );
            if let Some(res) = res {
                self.result = Some(res);
            }
        }
    }

    pub fn service<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        _now_ms: u32,
    ) -> Result<ServiceOutcome, Error<T::Error>> {
        if !self.pending.is_empty() {
            if !self.pending.try_flush(transport)? {
                return Ok(ServiceOutcome::Continue);
            }
        }

        // Spec §4.5 rule 5: a client sending `Expect: 100-continue` gets the
        // interim response before its body is read.
        if self.expect_continue && !self.continue_sent && matches!(self.phase, Phase::ReadingBody | Phase::ReadingMultipart) {
            crate::response::write_all(transport, b"HTTP/1.1 100 Continue\r\n\r\n", crate::response::HEADER_WRITE_RETRY_MS)?;
            self.continue_sent = true;
        }

        match self.phase {
            Phase::ReadingBody => {
                if self.body.len() as u64 >= self.expected_len() {
                    self.dispatch_simple();
                } else {
                    match transport.read(&mut self.in_buf)? {
                        crate::transport::ReadOutcome::Data(n) => {
                            self.body.extend_from_slice(&self.in_buf[..n]);
                            if self.body.len() as u64 >= self.expected_len() {
                                self.dispatch_simple();
                            }
                        }
                        crate::transport::ReadOutcome::WouldBlock => {}
                        crate::transport::ReadOutcome::Closed => return Err(Error::ConnectionClosed),
                    }
                }
            }
            Phase::ReadingMultipart => {
                if !self.handler.is_ready() {
                    return Ok(ServiceOutcome::Continue);
                }
                match transport.read(&mut self.in_buf)? {
                    crate::transport::ReadOutcome::Data(n) => {
                        self.body.extend_from_slice(&self.in_buf[..n]);
                        self.drain_multipart_parts();
                    }
                    crate::transport::ReadOutcome::WouldBlock => {}
                    crate::transport::ReadOutcome::Closed => return Err(Error::ConnectionClosed),
                }
            }
            Phase::Responding => {
                let result = self
                    .result
                    .take()
                    .unwrap_or_else(|| RestApiResult::json(500, b"{}".to_vec()));

                self.guard.send(
                    transport,
                    result.status,
                    &[("Content-Type", result.content_type)],
                    Some(result.body.len() as u64),
                    "close",
                )?;
                self.pending.set(result.body);
                self.pending.try_flush(transport)?;
                self.phase = Phase::Done;
            }
            Phase::Done => {
                if self.pending.is_empty() {
                    return Ok(ServiceOutcome::Done);
                }
            }
        }

        Ok(ServiceOutcome::Continue)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Extracts `name` and `filename` from a part's `Content-Disposition` line,
/// e.g. `form-data; name="file"; filename="a.bin"`. Parameters are matched
/// by `;`-separated position rather than a raw substring search: `name="`
/// is itself a substring of `filename="`, so a line with `filename` before
/// (or without) `name` would otherwise mis-tag the filename as the field name.
fn extract_content_disposition(headers: &[u8]) -> (Option<String>, Option<String>) {
    let text = String::from_utf8_lossy(headers);
    for line in text.lines() {
        if line.to_ascii_lowercase().starts_with("content-disposition:") {
            let mut name = None;
            let mut filename = None;

            for param in line.split(';').skip(1) {
                let param = param.trim();
                if let Some(rest) = param.strip_prefix("filename=\"") {
                    filename = rest.find('"').map(|end| rest[..end].to_string());
                } else if let Some(rest) = param.strip_prefix("name=\"") {
                    name = rest.find('"').map(|end| rest[..end].to_string());
                }
            }

            return (name, filename);
        }
    }
    (None, None)
}

#[cfg(test)]
mod test {
    use super::*;

    struct Echo;
    impl RestApiHandler for Echo {
        fn call(&mut self, _m: Method, url: &str, _q: &str, body: &[u8]) -> RestApiResult {
            RestApiResult::json(200, format!("{{\"url\":\"{url}\",\"len\":{}}}", body.len()))
        }
    }

    #[test]
    fn extracts_field_name_and_filename_from_content_disposition() {
        let headers = b"Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\nContent-Type: application/octet-stream";
        let (name, filename) = extract_content_disposition(headers);
        assert_eq!(name.as_deref(), Some("file"));
        assert_eq!(filename.as_deref(), Some("a.bin"));
    }

    #[test]
    fn filename_before_name_is_not_mistaken_for_the_field_name() {
        let headers = b"Content-Disposition: form-data; filename=\"a.bin\"; name=\"file\"";
        let (name, filename) = extract_content_disposition(headers);
        assert_eq!(name.as_deref(), Some("file"));
        assert_eq!(filename.as_deref(), Some("a.bin"));
    }

    #[test]
    fn file_field_with_no_name_param_has_no_field_name() {
        let headers = b"Content-Disposition: form-data; filename=\"a.bin\"";
        let (name, filename) = extract_content_disposition(headers);
        assert_eq!(name, None);
        assert_eq!(filename.as_deref(), Some("a.bin"));
    }

    #[test]
    fn plain_field_has_no_filename() {
        let headers = b"Content-Disposition: form-data; name=\"caption\"";
        let (name, filename) = extract_content_disposition(headers);
        assert_eq!(name.as_deref(), Some("caption"));
        assert_eq!(filename, None);
    }

    #[test]
    fn seed_body_appends_bytes_captured_past_the_header_block() {
        let mut header = crate::header::RequestHeader::<16>::new();
        header
            .feed::<()>(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel")
            .unwrap();
        let trailing = header.take_trailing();
        assert_eq!(trailing, b"hel");

        let mut responder = RestApiResponder::new(Echo, &header);
        responder.seed_body(&trailing);
        responder.seed_body(b"lo");
        assert_eq!(responder.body, b"hello");
    }

    #[test]
    fn find_locates_substring() {
        assert_eq!(find(b"hello--BOUNDARYworld", b"--BOUNDARY"), Some(5));
        assert_eq!(find(b"nothing here", b"--BOUNDARY"), None);
    }

    #[test]
    fn json_result_uses_text_json_content_type() {
        assert_eq!(RestApiResult::json(200, b"{}".to_vec()).content_type, "text/json");
    }
}
