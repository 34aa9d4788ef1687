//! Static file responder (component H).
//!
//! File access is abstracted behind `FileSystemChunker` rather than opening
//! `std::fs::File` directly, the way the original keeps web-server code
//! independent of the particular flash filesystem backing it; `StdFs` is the
//! `std::fs`-backed implementation used when this crate runs on a host with
//! a real filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::response::{PendingWrite, ServiceOutcome, StdHeaderGuard};
use crate::transport::ClientTransport;

/// Per-request cap on how many bytes a single `read_chunk` call may return,
/// so a large file is never buffered all at once.
pub const DEFAULT_CHUNK_LEN: usize = 4096;

/// Abstraction over "open a file under the served root and read it in chunks".
pub trait FileSystemChunker {
    type Handle;

    /// Opens `path` (already resolved against the served root) for reading.
    /// Returns `None` if it doesn't exist.
    fn open(&mut self, path: &str) -> Option<Self::Handle>;

    fn len(&self, handle: &Self::Handle) -> u64;

    /// Reads the next chunk into `buf`, returning how many bytes were read
    /// (`0` at end of file).
    fn read_chunk(&mut self, handle: &mut Self::Handle, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// `std::fs`-backed chunker rooted at a fixed base directory.
pub struct StdFs {
    root: PathBuf,
}

impl StdFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_start_matches('/');
        self.root.join(trimmed)
    }
}

impl FileSystemChunker for StdFs {
    type Handle = fs::File;

    fn open(&mut self, path: &str) -> Option<Self::Handle> {
        fs::File::open(self.resolve(path)).ok()
    }

    fn len(&self, handle: &Self::Handle) -> u64 {
        handle.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn read_chunk(&mut self, handle: &mut Self::Handle, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::io::Read;
        handle.read(buf)
    }
}

/// Extension-to-MIME-type table (spec §4.4.2). Falls back to
/// `text/plain` for anything unrecognized.
pub fn mime_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "text/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain",
        "xml" => "text/xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "eot" => "application/vnd.ms-fontobject",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/x-gzip",
        _ => "text/plain",
    }
}

/// Resolves a request URL to a served path (spec §9 Open Question): `/`
/// maps to the handler's configured default path; everything else is joined
/// to the served root as-is.
pub fn resolve_default<'a>(url: &'a str, default_path: &'a str) -> &'a str {
    if url == "/" {
        default_path
    } else {
        url
    }
}

enum Phase<F: FileSystemChunker> {
    Opening,
    Streaming(F::Handle, u64),
    NotFound,
    Done,
}

pub struct FileResponder<F: FileSystemChunker> {
    fs: F,
    path: String,
    gzip_ok: bool,
    phase: Option<Phase<F>>,
    guard: StdHeaderGuard,
    buf: [u8; DEFAULT_CHUNK_LEN],
    pending: PendingWrite,
}

impl<F: FileSystemChunker> FileResponder<F> {
    pub fn new(fs: F, path: String, client_accepts_gzip: bool) -> Self {
        Self {
            fs,
            path,
            gzip_ok: client_accepts_gzip,
            phase: Some(Phase::Opening),
            guard: StdHeaderGuard::new(),
            buf: [0u8; DEFAULT_CHUNK_LEN],
            pending: PendingWrite::new(),
        }
    }

    pub fn service<T: ClientTransport>(
        &mut self,
        transport: &mut T,
        _now_ms: u32,
    ) -> Result<ServiceOutcome, Error<T::Error>> {
        // A body write left over from the previous tick takes priority: a
        // momentarily full socket buffer is retried here rather than
        // abandoning the file transfer mid-stream (spec §7).
        if !self.pending.is_empty() {
            if !self.pending.try_flush(transport)? {
                return Ok(ServiceOutcome::Continue);
            }
        }

        match self.phase.take().unwrap_or(Phase::Done) {
            Phase::Opening => {
                // A `.gz` sibling is preferred when the client advertises
                // gzip support, so the host can serve pre-compressed assets
                // without this responder doing the compression itself.
                let gz_path = format!("{}.gz", self.path);
                if self.gzip_ok {
                    if let Some(handle) = self.fs.open(&gz_path) {
                        let len = self.fs.len(&handle);
                        self.guard.send(
                            transport,
                            200,
                            &[("Content-Type", mime_for(&self.path)), ("Content-Encoding", "gzip")],
                            Some(len),
                            "close",
                        )?;
                        self.phase = Some(Phase::Streaming(handle, len));
                        return Ok(ServiceOutcome::Continue);
                    }
                }

                match self.fs.open(&self.path) {
                    Some(handle) => {
                        let len = self.fs.len(&handle);
                        self.guard.send(
                            transport,
                            200,
                            &[("Content-Type", mime_for(&self.path))],
                            Some(len),
                            "close",
                        )?;
                        self.phase = Some(Phase::Streaming(handle, len));
                    }
                    None => {
                        self.guard.send(transport, 404, &[("Content-Type", "text/plain")], Some(9), "close")?;
                        self.pending.set(b"not found".to_vec());
                        self.phase = Some(Phase::NotFound);
                    }
                }
                Ok(ServiceOutcome::Continue)
            }
            Phase::Streaming(mut handle, remaining) => {
                let n = self
                    .fs
                    .read_chunk(&mut handle, &mut self.buf)
                    .map_err(|_| Error::InvalidState)?;

                if n == 0 {
                    self.phase = Some(Phase::Done);
                    return Ok(ServiceOutcome::Continue);
                }

                self.pending.set(self.buf[..n].to_vec());
                self.pending.try_flush(transport)?;
                self.phase = Some(Phase::Streaming(handle, remaining.saturating_sub(n as u64)));
                Ok(ServiceOutcome::Continue)
            }
            Phase::NotFound | Phase::Done => {
                if self.pending.is_empty() {
                    Ok(ServiceOutcome::Done)
                } else {
                    self.phase = Some(Phase::Done);
                    Ok(ServiceOutcome::Continue)
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mime_lookup() {
        assert_eq!(mime_for("/a/b.html"), "text/html");
        assert_eq!(mime_for("/a/b.JPG"), "image/jpeg");
        assert_eq!(mime_for("/a/b.json"), "text/json");
        assert_eq!(mime_for("/a/b.xml"), "text/xml");
        assert_eq!(mime_for("/a/b.pdf"), "application/pdf");
        assert_eq!(mime_for("/a/b.gz"), "application/x-gzip");
        assert_eq!(mime_for("/a/b.unknown"), "text/plain");
        assert_eq!(mime_for("/noext"), "text/plain");
    }

    #[test]
    fn root_resolves_to_default_path() {
        assert_eq!(resolve_default("/", "/index.html"), "/index.html");
        assert_eq!(resolve_default("/style.css", "/index.html"), "/style.css");
    }

    #[test]
    fn streams_a_real_file_through_std_fs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi there").unwrap();

        let mut fs = StdFs::new(dir.path());
        let mut handle = fs.open("/hello.txt").unwrap();
        assert_eq!(fs.len(&handle), 8);

        let mut buf = [0u8; 64];
        let n = fs.read_chunk(&mut handle, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = StdFs::new(dir.path());
        assert!(fs.open("/nope.txt").is_none());
    }
}
