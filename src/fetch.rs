//! Artifact retrieval and checksum verification.
//!
//! Downloads are streamed once through a [`HashingWriter`], which feeds the
//! same bytes to the SHA-256 digest and to the scratch file, so the digest
//! always describes exactly what was written to disk.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use reqwest::blocking::{Client, Response};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;
use crate::context::Context;
use crate::error::KindlyError;
use crate::util::file_name_from_url;

const CHUNK_SIZE: usize = 64 * 1024;
const USER_AGENT: &str = concat!("kindly/", env!("CARGO_PKG_VERSION"));
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const BODY_QUEUE_DEPTH: usize = 4;

/// Opens a byte stream for a URL.
///
/// The production implementation is [`HttpTransport`]; tests substitute an
/// in-memory one.
pub trait Transport: Send + Sync {
    fn open(&self, ctx: &Context, url: &str) -> Result<Box<dyn Read + Send>, KindlyError>;
}

/// Blocking HTTP transport with a connect bound and a total-request bound.
///
/// The request and every body read run on a worker thread while the caller
/// polls its [`Context`], so cancelling the context returns `Cancelled`
/// promptly even when the server has stopped answering.
pub struct HttpTransport {
    client: Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, KindlyError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| KindlyError::DownloadFailed {
                url: String::new(),
                reason: format!("could not create HTTP client: {e}"),
            })?;
        Ok(Self { client, request_timeout })
    }

    /// The total bound for one request, never past the context deadline.
    fn timeout_for(&self, ctx: &Context) -> Duration {
        match ctx.remaining() {
            Some(left) => left.min(self.request_timeout),
            None => self.request_timeout,
        }
    }
}

/// Waits for a worker's result, checking `ctx` every [`POLL_INTERVAL`].
///
/// `None` means the worker went away without sending anything.
fn wait_for<T>(ctx: &Context, url: &str, rx: &Receiver<T>) -> Result<Option<T>, KindlyError> {
    loop {
        ctx.check(url)?;
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(value) => return Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(None),
        }
    }
}

impl Transport for HttpTransport {
    fn open(&self, ctx: &Context, url: &str) -> Result<Box<dyn Read + Send>, KindlyError> {
        ctx.check(url)?;
        let request = self.client.get(url).timeout(self.timeout_for(ctx));
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(request.send());
        });

        let response = match wait_for(ctx, url, &rx)? {
            Some(response) => response.map_err(|e| map_reqwest_error(url, e))?,
            None => {
                return Err(KindlyError::DownloadFailed {
                    url: url.to_string(),
                    reason: "request worker exited".to_string(),
                });
            }
        };
        let status = response.status();
        if !status.is_success() {
            return Err(KindlyError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        Ok(Box::new(CancellableBody::spawn(ctx.clone(), url, response)))
    }
}

/// A response body read on a worker thread and handed over in chunks.
///
/// Reads fail with the context's error (wrapped in `io::Error`) as soon as
/// the context is cancelled or its deadline passes.
struct CancellableBody {
    ctx: Context,
    url: String,
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl CancellableBody {
    fn spawn(ctx: Context, url: &str, mut response: Response) -> Self {
        let (tx, rx) = mpsc::sync_channel(BODY_QUEUE_DEPTH);
        thread::spawn(move || {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let chunk = match response.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(timeout_kind(e)),
                };
                let failed = chunk.is_err();
                // a send error means the reader was dropped
                if tx.send(chunk).is_err() || failed {
                    break;
                }
            }
        });
        Self {
            ctx,
            url: url.to_string(),
            chunks: rx,
            pending: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl Read for CancellableBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.pending.len() {
            if self.done {
                return Ok(0);
            }
            match wait_for(&self.ctx, &self.url, &self.chunks).map_err(io::Error::other)? {
                Some(chunk) => {
                    self.pending = chunk?;
                    self.pos = 0;
                }
                None => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Gives reqwest's body timeouts the `TimedOut` kind.
fn timeout_kind(e: io::Error) -> io::Error {
    let is_timeout = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
        .is_some_and(reqwest::Error::is_timeout);
    if is_timeout {
        io::Error::new(io::ErrorKind::TimedOut, e)
    } else {
        e
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> KindlyError {
    if e.is_timeout() {
        KindlyError::NetworkTimeout(url.to_string())
    } else {
        KindlyError::DownloadFailed { url: url.to_string(), reason: e.to_string() }
    }
}

fn map_read_error(url: &str, e: io::Error) -> KindlyError {
    if e.kind() == io::ErrorKind::TimedOut {
        return KindlyError::NetworkTimeout(url.to_string());
    }
    let reason = e.to_string();
    // context errors raised inside a reader come back unwrapped
    match e.into_inner().map(|inner| inner.downcast::<KindlyError>()) {
        Some(Ok(error)) => *error,
        _ => KindlyError::DownloadFailed { url: url.to_string(), reason },
    }
}

/// A writer that forwards every byte to `inner` and to a SHA-256 digest.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: Sha256::new() }
    }

    /// Hex-encoded digest of everything written, plus the inner writer.
    pub fn finish(self) -> (String, W) {
        (hex::encode(self.hasher.finalize()), self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A downloaded artifact in the scratch directory.
#[derive(Debug, Clone)]
pub struct Download {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents.
    pub sha256: String,
    pub size: u64,
}

/// Copies `reader` into `writer` in chunks, checking `ctx` between chunks.
fn copy_with_context<R: Read + ?Sized, W: Write>(
    ctx: &Context,
    url: &str,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, KindlyError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        ctx.check(url)?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_read_error(url, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| KindlyError::file_op("write", url, e))?;
        total += n as u64;
    }
    Ok(total)
}

/// Fetches a URL fully into memory.
pub fn fetch_bytes(transport: &dyn Transport, ctx: &Context, url: &str) -> Result<Vec<u8>, KindlyError> {
    let mut reader = transport.open(ctx, url)?;
    let mut bytes = Vec::new();
    copy_with_context(ctx, url, &mut reader, &mut bytes)?;
    Ok(bytes)
}

/// Fetches a URL and decodes it as UTF-8 text.
pub fn fetch_text(transport: &dyn Transport, ctx: &Context, url: &str) -> Result<String, KindlyError> {
    let bytes = fetch_bytes(transport, ctx, url)?;
    String::from_utf8(bytes).map_err(|e| KindlyError::DownloadFailed {
        url: url.to_string(),
        reason: format!("response is not UTF-8: {e}"),
    })
}

/// Downloads `url` into `scratch_dir`, named after the URL's last path
/// segment, hashing the bytes as they are written.
pub fn download(
    transport: &dyn Transport,
    ctx: &Context,
    url: &Url,
    scratch_dir: &Path,
) -> Result<Download, KindlyError> {
    let file_name = file_name_from_url(url.as_str()).ok_or_else(|| KindlyError::DownloadFailed {
        url: url.to_string(),
        reason: "URL has no file name".to_string(),
    })?;
    let path = scratch_dir.join(file_name);
    debug!(url = %url, "Downloading file");

    let mut reader = transport.open(ctx, url.as_str())?;
    let file = std::fs::File::create(&path)
        .map_err(|e| KindlyError::file_op("create", &path, e))?;
    let mut tee = HashingWriter::new(io::BufWriter::new(file));
    let size = copy_with_context(ctx, url.as_str(), &mut reader, &mut tee)?;
    let (sha256, mut file) = tee.finish();
    file.flush().map_err(|e| KindlyError::file_op("write", &path, e))?;

    debug!(path = %path.display(), size, "Download finished");
    debug!(sha256 = %sha256, "Calculated SHA256 value");
    Ok(Download { path, sha256, size })
}

/// Picks the digest for `os`/`arch` out of a checksum file.
///
/// Each line is a hex digest optionally followed by a label (usually the
/// file name). The first labelled line whose label contains both the OS and
/// the architecture token wins. If no line carries a label, the single
/// unlabelled digest is used.
pub fn select_checksum(contents: &str, os: &str, arch: &str) -> Option<String> {
    let mut unlabelled = Vec::new();
    let mut any_labelled = false;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let Some(digest) = parts.next() else { continue };
        match parts.next().map(str::trim).filter(|l| !l.is_empty()) {
            Some(label) => {
                any_labelled = true;
                if label.contains(os) && label.contains(arch) {
                    return Some(digest.to_lowercase());
                }
            }
            None => unlabelled.push(digest.to_lowercase()),
        }
    }
    if any_labelled || unlabelled.len() != 1 {
        return None;
    }
    unlabelled.pop()
}

/// Compares a downloaded artifact against its published checksum file.
pub fn verify_checksum(
    transport: &dyn Transport,
    ctx: &Context,
    download: &Download,
    checksum_url: &Url,
    os: &str,
    arch: &str,
) -> Result<(), KindlyError> {
    debug!(url = %checksum_url, "Downloading SHA256 file");
    let contents = fetch_text(transport, ctx, checksum_url.as_str())?;
    let expected = select_checksum(&contents, os, arch);
    debug!(expected = ?expected, "SHA256 file hash value");

    let file = download
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match expected {
        Some(expected) if expected == download.sha256 => Ok(()),
        Some(expected) => Err(KindlyError::ChecksumMismatch {
            file,
            expected,
            actual: download.sha256.clone(),
        }),
        None => Err(KindlyError::ChecksumMismatch {
            file,
            expected: format!("<no entry for {os}_{arch}>"),
            actual: download.sha256.clone(),
        }),
    }
}
