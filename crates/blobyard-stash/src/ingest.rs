//! Upload ingest: digest and store every regular file of a zip archive

use std::fs::File;
use std::io::{ErrorKind, Seek, SeekFrom};
use std::ops::RangeInclusive;
use std::path::Path;

use blobyard_common::{Digest, DigestWriter, FileMode, Fingerprint, ParseError};
use blobyard_store::{BlobBody, Blobstore, PutResponse};
use tracing::{debug, info, instrument};
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::cancel::CancelSignal;
use crate::error::{Result, StashError};
use crate::Stash;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;

/// A stored archive entry. `name` is the path exactly as found in the archive.
#[derive(Debug, Clone)]
pub struct IngestedEntry {
    pub name: String,
    pub digest: Digest,
    pub mode: FileMode,
    pub size: u64,
    pub(crate) modified: zip::DateTime,
}

impl IngestedEntry {
    /// Fingerprint for bundling this entry; fails for names that are not relative paths
    pub fn fingerprint(&self) -> std::result::Result<Fingerprint, ParseError> {
        Fingerprint::new(self.digest.clone(), self.name.clone(), self.mode)
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    /// Regular files of the archive, in archive order
    pub entries: Vec<IngestedEntry>,
    /// Entries whose digest was new to the blobstore
    pub stored: usize,
    /// Entries whose digest was already present
    pub deduplicated: usize,
    /// Directories, symlinks and entries outside the size window
    pub skipped: usize,
}

impl IngestReport {
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.entries.iter().map(|entry| &entry.digest)
    }
}

/// Archive entry copied out to an anonymous spool file, rewound for reading
struct SpooledEntry {
    name: String,
    mode: FileMode,
    modified: zip::DateTime,
    digest: Digest,
    size: u64,
    file: File,
}

impl Stash {
    /// Store every regular file of a zip archive under its content digest.
    ///
    /// Stops at the first failing entry; blobs stored before the failure stay
    /// in place, which is harmless because they are addressed by content.
    #[instrument(skip_all, fields(archive = %archive.display()))]
    pub async fn ingest(&self, archive: &Path) -> Result<IngestReport> {
        let report = ingest_archive(
            self.store.as_ref(),
            archive,
            &self.config.temp_dir(),
            0..=u64::MAX,
            &CancelSignal::new(),
        )
        .await?;

        info!(
            files = report.entries.len(),
            stored = report.stored,
            deduplicated = report.deduplicated,
            skipped = report.skipped,
            "Ingested application archive"
        );
        Ok(report)
    }
}

/// Ingest the entries of `archive` whose uncompressed size lies in `size_window`.
///
/// Only one entry is spooled at a time; the archive handle is closed on return.
pub(crate) async fn ingest_archive(
    store: &dyn Blobstore,
    archive: &Path,
    spool_dir: &Path,
    size_window: RangeInclusive<u64>,
    cancel: &CancelSignal,
) -> Result<IngestReport> {
    let path = archive.to_path_buf();
    let mut zip = tokio::task::spawn_blocking(move || open_archive(&path)).await??;
    let mut report = IngestReport::default();

    for index in 0..zip.len() {
        cancel.check()?;

        let dir = spool_dir.to_path_buf();
        let window = size_window.clone();
        let (returned, spooled) = tokio::task::spawn_blocking(move || {
            let spooled = spool_entry(&mut zip, index, &dir, &window);
            (zip, spooled)
        })
        .await?;
        zip = returned;

        let Some(spooled) = spooled? else {
            report.skipped += 1;
            continue;
        };

        let SpooledEntry {
            name,
            mode,
            modified,
            digest,
            size,
            file,
        } = spooled;
        if store_spooled(store, &digest, file).await? {
            report.stored += 1;
        } else {
            report.deduplicated += 1;
        }
        report.entries.push(IngestedEntry {
            name,
            digest,
            mode,
            size,
            modified,
        });
    }

    Ok(report)
}

/// Put a spooled blob unless its digest is already stored. Returns whether a Put happened.
async fn store_spooled(store: &dyn Blobstore, digest: &Digest, spool: File) -> Result<bool> {
    if store.exists(digest.as_str()).await? {
        debug!(%digest, "Blob already stored");
        return Ok(false);
    }

    let body: BlobBody = Box::pin(tokio::fs::File::from_std(spool));
    match store.put(digest.as_str(), body).await? {
        PutResponse::Stored => Ok(true),
        PutResponse::Redirect(location) => Err(StashError::UnexpectedRedirect {
            digest: digest.clone(),
            location,
        }),
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(StashError::MalformedArchive)
}

fn is_regular_file(entry: &ZipFile<'_>) -> bool {
    if entry.is_dir() {
        return false;
    }
    // Archives written without unix attributes carry no file type bits
    match entry.unix_mode().map(|mode| mode & S_IFMT) {
        None | Some(0) | Some(S_IFREG) => true,
        Some(_) => false,
    }
}

/// Digest one entry while copying it to a spool file, in a single read pass.
/// Returns `None` for entries that are not ingested.
fn spool_entry(
    archive: &mut ZipArchive<File>,
    index: usize,
    spool_dir: &Path,
    size_window: &RangeInclusive<u64>,
) -> Result<Option<SpooledEntry>> {
    let mut entry = archive
        .by_index(index)
        .map_err(StashError::MalformedArchive)?;

    if !is_regular_file(&entry) || !size_window.contains(&entry.size()) {
        debug!(name = entry.name(), size = entry.size(), "Skipping archive entry");
        return Ok(None);
    }

    let name = entry.name().to_string();
    let mode = entry
        .unix_mode()
        .map(FileMode::from_unix_mode)
        .unwrap_or_default();
    let modified = entry.last_modified();

    let mut writer = DigestWriter::new(tempfile::tempfile_in(spool_dir)?);
    std::io::copy(&mut entry, &mut writer).map_err(|e| match e.kind() {
        // Corrupt compressed data or a failed CRC check
        ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
            StashError::MalformedArchive(ZipError::Io(e))
        }
        _ => StashError::Io(e),
    })?;
    let (mut file, digest, size) = writer.finish();
    file.seek(SeekFrom::Start(0))?;

    Ok(Some(SpooledEntry {
        name,
        mode,
        modified,
        digest,
        size,
        file,
    }))
}
