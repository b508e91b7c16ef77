//! Bundle assembly: rebuild an application zip from fingerprints
//!
//! Every entry is fetched into its own spool file before being compressed into
//! the output archive. A fetch that fails part-way is thrown away together with
//! its spool and restarted from a fresh `get`, so bytes from a broken attempt
//! can never leak into the bundle. At any moment assembly holds the archive
//! writer, at most one blob body and at most one spool file.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use blobyard_common::{Digest, Fingerprint};
use blobyard_store::{Blobstore, GetResponse, StoreError};
use chrono::{Datelike, Timelike, Utc};
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::cancel::CancelSignal;
use crate::error::{FetchError, Result, StashError};
use crate::ingest::ingest_archive;
use crate::retry::RetryError;
use crate::Stash;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Uploaded archive merged into a bundle. Only entries whose uncompressed size
/// lies in `minimum_size..=maximum_size` are stored and bundled.
#[derive(Debug, Clone)]
pub struct SourceArchive {
    pub path: PathBuf,
    pub minimum_size: u64,
    pub maximum_size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BundleRequest {
    pub fingerprints: Vec<Fingerprint>,
    pub source: Option<SourceArchive>,
}

impl BundleRequest {
    pub fn new(fingerprints: Vec<Fingerprint>) -> Self {
        Self {
            fingerprints,
            source: None,
        }
    }

    pub fn with_source_archive(
        mut self,
        path: impl Into<PathBuf>,
        minimum_size: u64,
        maximum_size: u64,
    ) -> Self {
        self.source = Some(SourceArchive {
            path: path.into(),
            minimum_size,
            maximum_size,
        });
        self
    }
}

/// Completed bundle on disk. The file is deleted when this value is dropped,
/// unless ownership of the path is taken with [`AssembledArchive::into_temp_path`].
#[derive(Debug)]
pub struct AssembledArchive {
    path: TempPath,
    entries: usize,
    size: u64,
}

impl AssembledArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Archive size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn open(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path).await
    }

    pub fn into_temp_path(self) -> TempPath {
        self.path
    }
}

struct BundleEntry {
    fingerprint: Fingerprint,
    /// Timestamp carried over from an uploaded archive
    modified: Option<zip::DateTime>,
}

impl Stash {
    /// Build a zip archive holding every requested fingerprint.
    ///
    /// Either the whole bundle is produced or nothing is: on any failure, and on
    /// cancellation, the partial archive is removed before returning.
    #[instrument(
        skip_all,
        fields(
            fingerprints = request.fingerprints.len(),
            with_source = request.source.is_some()
        )
    )]
    pub async fn assemble(
        &self,
        request: BundleRequest,
        cancel: &CancelSignal,
    ) -> Result<AssembledArchive> {
        let started = Instant::now();
        let temp_dir = self.config.temp_dir();
        let BundleRequest {
            fingerprints,
            source,
        } = request;

        let mut working_set = Vec::with_capacity(fingerprints.len());
        if let Some(source) = source {
            let report = ingest_archive(
                self.store.as_ref(),
                &source.path,
                &temp_dir,
                source.minimum_size..=source.maximum_size,
                cancel,
            )
            .await?;
            debug!(
                merged = report.entries.len(),
                dropped = report.skipped,
                "Merged uploaded archive"
            );
            for entry in &report.entries {
                working_set.push(BundleEntry {
                    fingerprint: entry.fingerprint()?,
                    modified: Some(entry.modified),
                });
            }
        }

        let uploaded: HashSet<String> = working_set
            .iter()
            .map(|entry| entry.fingerprint.name().to_string())
            .collect();
        for fingerprint in fingerprints {
            if uploaded.contains(fingerprint.name()) {
                debug!(name = fingerprint.name(), "Uploaded file replaces fingerprint");
                continue;
            }
            working_set.push(BundleEntry {
                fingerprint,
                modified: None,
            });
        }

        let staged = tempfile::Builder::new()
            .prefix("bundle-")
            .suffix(".zip")
            .tempfile_in(&temp_dir)?;
        let (file, path) = staged.into_parts();
        let mut writer = BundleWriter::new(file);
        let total = working_set.len();

        for entry in working_set {
            cancel.check()?;
            let spool = self.fetch_to_spool(&entry.fingerprint, &temp_dir).await?;
            writer = tokio::task::spawn_blocking(move || -> Result<BundleWriter> {
                writer.append(&entry, spool)?;
                Ok(writer)
            })
            .await??;
        }

        let size = tokio::task::spawn_blocking(move || writer.finish()).await??;
        info!(
            entries = total,
            bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Assembled bundle"
        );

        Ok(AssembledArchive {
            path,
            entries: total,
            size,
        })
    }

    /// Fetch one blob into a rewound spool file, restarting from scratch on
    /// retryable failures.
    async fn fetch_to_spool(&self, fingerprint: &Fingerprint, spool_dir: &Path) -> Result<File> {
        let store = self.store.as_ref();
        let digest = fingerprint.digest();

        let outcome = self
            .config
            .retry_policy()
            .run(|_attempt| fetch_once(store, digest, spool_dir))
            .await;

        outcome.map_err(|err| match err {
            RetryError::Fatal(FetchError::Store(StoreError::NotFound { .. })) => {
                StashError::MissingBlob {
                    digest: digest.clone(),
                    name: fingerprint.name().to_string(),
                }
            }
            RetryError::Fatal(FetchError::Store(e)) => StashError::Storage(e),
            RetryError::Fatal(FetchError::Redirect(location)) => StashError::UnexpectedRedirect {
                digest: digest.clone(),
                location,
            },
            RetryError::Fatal(FetchError::Read(e) | FetchError::Spool(e)) => StashError::Io(e),
            RetryError::Exhausted { attempts, last } => StashError::FetchExhausted {
                digest: digest.clone(),
                name: fingerprint.name().to_string(),
                attempts,
                source: last,
            },
        })
    }
}

/// One attempt: a fresh `get` streamed into a fresh spool file.
///
/// The blob body is closed before returning, whatever the outcome.
async fn fetch_once(
    store: &dyn Blobstore,
    digest: &Digest,
    spool_dir: &Path,
) -> std::result::Result<File, FetchError> {
    let mut body = match store.get(digest.as_str()).await? {
        GetResponse::Inline(body) => body,
        GetResponse::Redirect(location) => return Err(FetchError::Redirect(location)),
    };

    let spool = tempfile::tempfile_in(spool_dir).map_err(FetchError::Spool)?;
    let mut spool = tokio::fs::File::from_std(spool);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = body.read(&mut buffer).await.map_err(FetchError::Read)?;
        if read == 0 {
            break;
        }
        spool
            .write_all(&buffer[..read])
            .await
            .map_err(FetchError::Spool)?;
    }
    drop(body);

    spool.flush().await.map_err(FetchError::Spool)?;
    let mut spool = spool.into_std().await;
    spool.seek(SeekFrom::Start(0)).map_err(FetchError::Spool)?;
    Ok(spool)
}

/// Blocking zip writer over the staged archive file
struct BundleWriter {
    zip: ZipWriter<File>,
    created: zip::DateTime,
}

impl BundleWriter {
    fn new(file: File) -> Self {
        Self {
            zip: ZipWriter::new(file),
            created: zip_timestamp_now(),
        }
    }

    fn append(&mut self, entry: &BundleEntry, mut spool: File) -> Result<u64> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(entry.fingerprint.mode().bits())
            .last_modified_time(entry.modified.unwrap_or(self.created));

        self.zip
            .start_file(entry.fingerprint.name(), options)
            .map_err(StashError::ArchiveWrite)?;
        let written = std::io::copy(&mut spool, &mut self.zip)?;
        Ok(written)
    }

    fn finish(mut self) -> Result<u64> {
        let file = self.zip.finish().map_err(StashError::ArchiveWrite)?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }
}

fn zip_timestamp_now() -> zip::DateTime {
    let now = Utc::now();
    zip::DateTime::from_date_and_time(
        now.year() as u16,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )
    .unwrap_or_default()
}
