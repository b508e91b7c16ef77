//! Mock blobstores and archive helpers shared by the stash integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use blobyard_common::{Digest, FileMode, Fingerprint};
use blobyard_stash::{CancelSignal, Stash, StashConfig};
use blobyard_store::{
    BlobBody, Blobstore, GetResponse, MemoryBlobstore, PutResponse, Result as StoreResult,
    StoreError, StoreOp,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use zip::write::FileOptions;

/// Stash writing its spools and bundles into `temp_dir`, without retry delays
pub fn stash_in(store: Arc<dyn Blobstore>, temp_dir: &Path) -> Stash {
    Stash::new(
        store,
        StashConfig {
            fetch_attempts: 3,
            retry_backoff_ms: 0,
            temp_dir: Some(temp_dir.to_path_buf()),
            ..StashConfig::default()
        },
    )
}

pub async fn put_blob(store: &dyn Blobstore, content: &[u8]) -> Digest {
    let digest = Digest::of(content);
    let body: BlobBody = Box::pin(Cursor::new(content.to_vec()));
    store.put(digest.as_str(), body).await.unwrap();
    digest
}

pub fn fingerprint(content: &[u8], name: &str, mode: u32) -> Fingerprint {
    Fingerprint::new(Digest::of(content), name, FileMode::new(mode).unwrap()).unwrap()
}

/// Zip archive with one regular file per `(name, content, mode)`
pub fn zip_bytes(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content, mode) in entries {
        zip.start_file(*name, FileOptions::default().unix_permissions(*mode))
            .unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub name: String,
    pub mode: u32,
    pub content: Vec<u8>,
    pub year: u16,
}

pub fn read_bundle(path: &Path) -> Vec<BundleFile> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut files = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        files.push(BundleFile {
            name: entry.name().to_string(),
            mode: entry.unix_mode().unwrap_or_default() & 0o7777,
            content,
            year: entry.last_modified().year(),
        });
    }
    files
}

pub fn dir_entries(path: &Path) -> usize {
    std::fs::read_dir(path).unwrap().count()
}

/// Injected failure for the next `get` of a key
#[derive(Debug, Clone)]
pub enum GetFault {
    /// `get` itself fails with a transient error
    Transient,
    /// `get` succeeds, but the body errors after delivering `after` bytes
    BrokenBody { after: usize },
    Redirect(String),
}

/// Memory blobstore with scripted `get` failures and per-key call counts
pub struct FlakyBlobstore {
    pub inner: MemoryBlobstore,
    faults: Mutex<HashMap<String, VecDeque<GetFault>>>,
    broken: Mutex<HashSet<String>>,
    failing_puts: Mutex<HashSet<String>>,
    gets: Mutex<HashMap<String, usize>>,
}

impl FlakyBlobstore {
    pub fn new() -> Self {
        Self {
            inner: MemoryBlobstore::new(),
            faults: Mutex::new(HashMap::new()),
            broken: Mutex::new(HashSet::new()),
            failing_puts: Mutex::new(HashSet::new()),
            gets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn fail_next_get(&self, key: &str, fault: GetFault) {
        self.faults
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Every `get` and `exists` of `key` fails with a backend error
    pub async fn break_key(&self, key: &str) {
        self.broken.lock().await.insert(key.to_string());
    }

    /// Every `put` of `key` fails with a backend error
    pub async fn fail_puts(&self, key: &str) {
        self.failing_puts.lock().await.insert(key.to_string());
    }

    pub async fn get_count(&self, key: &str) -> usize {
        self.gets.lock().await.get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Blobstore for FlakyBlobstore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        if self.broken.lock().await.contains(key) {
            return Err(StoreError::backend(StoreOp::Exists, key, "injected failure"));
        }
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<GetResponse> {
        *self.gets.lock().await.entry(key.to_string()).or_default() += 1;
        if self.broken.lock().await.contains(key) {
            return Err(StoreError::backend(StoreOp::Get, key, "injected failure"));
        }

        let fault = self
            .faults
            .lock()
            .await
            .get_mut(key)
            .and_then(|faults| faults.pop_front());
        match fault {
            None => self.inner.get(key).await,
            Some(GetFault::Transient) => Err(StoreError::Transient {
                op: StoreOp::Get,
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "injected"),
            }),
            Some(GetFault::BrokenBody { after }) => {
                let data = self
                    .inner
                    .bytes(key)
                    .await
                    .ok_or_else(|| StoreError::not_found(key))?;
                let prefix = data[..after.min(data.len())].to_vec();
                Ok(GetResponse::Inline(Box::pin(BrokenBody {
                    prefix: Cursor::new(prefix),
                })))
            }
            Some(GetFault::Redirect(url)) => Ok(GetResponse::Redirect(url)),
        }
    }

    async fn put(&self, key: &str, body: BlobBody) -> StoreResult<PutResponse> {
        if self.failing_puts.lock().await.contains(key) {
            return Err(StoreError::backend(StoreOp::Put, key, "injected failure"));
        }
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }
}

/// Delivers a prefix of the blob, then fails like a dropped connection
struct BrokenBody {
    prefix: Cursor<Vec<u8>>,
}

impl AsyncRead for BrokenBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if (this.prefix.position() as usize) < this.prefix.get_ref().len() {
            return Pin::new(&mut this.prefix).poll_read(cx, buf);
        }
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset mid-body",
        )))
    }
}

/// Memory blobstore that tracks how many blob bodies are open at once
pub struct CountingBlobstore {
    pub inner: MemoryBlobstore,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CountingBlobstore {
    pub fn new() -> Self {
        Self {
            inner: MemoryBlobstore::new(),
            open: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_bodies(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak_open_bodies(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Blobstore for CountingBlobstore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<GetResponse> {
        match self.inner.get(key).await? {
            GetResponse::Inline(body) => {
                let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now_open, Ordering::SeqCst);
                Ok(GetResponse::Inline(Box::pin(CountedBody {
                    inner: body,
                    open: self.open.clone(),
                })))
            }
            redirect => Ok(redirect),
        }
    }

    async fn put(&self, key: &str, body: BlobBody) -> StoreResult<PutResponse> {
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }
}

struct CountedBody {
    inner: BlobBody,
    open: Arc<AtomicUsize>,
}

impl AsyncRead for CountedBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.get_mut().inner.as_mut().poll_read(cx, buf)
    }
}

impl Drop for CountedBody {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counting blobstore that cancels `signal` as soon as a blob is fetched
pub struct CancellingBlobstore {
    pub inner: CountingBlobstore,
    signal: CancelSignal,
    gets: AtomicUsize,
}

impl CancellingBlobstore {
    pub fn new(signal: CancelSignal) -> Self {
        Self {
            inner: CountingBlobstore::new(),
            signal,
            gets: AtomicUsize::new(0),
        }
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Blobstore for CancellingBlobstore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<GetResponse> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.signal.cancel();
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, body: BlobBody) -> StoreResult<PutResponse> {
        self.inner.put(key, body).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }
}

/// In-memory sink for formatted log output
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
