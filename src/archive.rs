//! Archive output
//!
//! Every fetched resource ends up as one named entry in a zip file. Fetch
//! tasks share one sink per fabric, so writes go through a single lock: the
//! zip format cannot interleave two entries.
//!
//! Compression and file writes are blocking. On a multi-threaded tokio
//! runtime they run under `block_in_place`, so a large page does not stall
//! the other tasks scheduled on that worker.

use crate::error::ArchiveError;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Write-many, close-once container for named byte blobs.
///
/// Names are not deduplicated; callers keep them unique.
pub trait ArchiveSink: Send + Sync {
    /// Append one entry
    fn add(&self, name: &str, content: &[u8]) -> Result<(), ArchiveError>;

    /// Finalize the container. Call once, after every producer is done.
    fn close(&self) -> Result<(), ArchiveError>;
}

// ============================================================================
// Zip file sink
// ============================================================================

/// Zip file on disk
pub struct ZipArchiveWriter {
    path: PathBuf,
    writer: Mutex<Option<ZipWriter<File>>>,
}

impl ZipArchiveWriter {
    /// Create (or truncate) the zip file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(ZipWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run blocking archive work, handing the worker thread over first when
/// called from a multi-threaded runtime. `block_in_place` panics on a
/// current-thread runtime, so there (and outside tokio) it runs inline.
fn run_blocking<R>(work: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

impl ArchiveSink for ZipArchiveWriter {
    fn add(&self, name: &str, content: &[u8]) -> Result<(), ArchiveError> {
        run_blocking(|| -> Result<(), ArchiveError> {
            let mut guard = self.writer.lock().map_err(|_| ArchiveError::Poisoned)?;
            let writer = guard.as_mut().ok_or(ArchiveError::Closed)?;

            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(name, options)?;
            writer.write_all(content)?;

            tracing::trace!(entry = name, bytes = content.len(), "archive entry written");
            Ok(())
        })
    }

    fn close(&self) -> Result<(), ArchiveError> {
        run_blocking(|| self.finalize())
    }
}

impl ZipArchiveWriter {
    fn finalize(&self) -> Result<(), ArchiveError> {
        let mut guard = self.writer.lock().map_err(|_| ArchiveError::Poisoned)?;
        let writer = guard.take().ok_or(ArchiveError::Closed)?;

        let file = writer.finish()?;
        file.sync_all()?;

        tracing::debug!(path = %self.path.display(), "archive closed");
        Ok(())
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Entries kept in memory, in write order. Duplicated names are kept twice.
#[derive(Default)]
pub struct MemoryArchive {
    entries: Mutex<Vec<(String, Vec<u8>)>>,
    closed: Mutex<bool>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of the first entry with this name
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .ok()?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
    }

    /// Entry names in write order
    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }
}

impl ArchiveSink for MemoryArchive {
    fn add(&self, name: &str, content: &[u8]) -> Result<(), ArchiveError> {
        if self.is_closed() {
            return Err(ArchiveError::Closed);
        }
        self.entries
            .lock()
            .map_err(|_| ArchiveError::Poisoned)?
            .push((name.to_string(), content.to_vec()));
        Ok(())
    }

    fn close(&self) -> Result<(), ArchiveError> {
        let mut closed = self.closed.lock().map_err(|_| ArchiveError::Poisoned)?;
        if *closed {
            return Err(ArchiveError::Closed);
        }
        *closed = true;
        Ok(())
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// What [`merge_archives`] did
#[derive(Debug, Default, Clone)]
pub struct MergeReport {
    /// Entries copied into the aggregate
    pub added: usize,
    /// Base names dropped because an earlier archive already had them
    pub skipped: Vec<String>,
    /// Source archives that did not exist
    pub missing: Vec<PathBuf>,
}

/// Combine finished archives into one, keyed by entry base name.
///
/// The first archive to provide a name wins. Sources must already be closed.
pub fn merge_archives(sources: &[PathBuf], dest: &Path) -> Result<MergeReport, ArchiveError> {
    let out = ZipArchiveWriter::create(dest)?;
    let mut report = MergeReport::default();
    let mut seen = HashSet::new();

    for src in sources {
        if !src.exists() {
            tracing::warn!(archive = %src.display(), "archive not found, skipping");
            report.missing.push(src.clone());
            continue;
        }

        let mut archive = ZipArchive::new(File::open(src)?)?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }

            let base = Path::new(entry.name())
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.name().to_string());

            if !seen.insert(base.clone()) {
                tracing::info!(
                    entry = %base,
                    archive = %src.display(),
                    "duplicate entry, keeping the first one"
                );
                report.skipped.push(base);
                continue;
            }

            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            out.add(&base, &content)?;
            report.added += 1;
        }
    }

    out.close()?;
    Ok(report)
}

/// Return `path` if it is free, else the first free `name (N).ext`
pub fn next_available_path(path: &Path) -> PathBuf {
    next_free_path(path, &HashSet::new())
}

/// Like [`next_available_path`], also skipping paths already handed out in
/// this run (files that do not exist yet)
pub fn next_free_path(path: &Path, reserved: &HashSet<PathBuf>) -> PathBuf {
    let is_free = |p: &Path| !p.exists() && !reserved.contains(p);
    if is_free(path) {
        return path.to_path_buf();
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = match file_name.split_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
        None => (file_name.clone(), String::new()),
    };

    (1..)
        .map(|i| path.with_file_name(format!("{} ({}){}", stem, i, ext)))
        .find(|candidate| is_free(candidate))
        .unwrap_or_else(|| path.to_path_buf())
}

/// Read every entry of a zip file into memory, in archive order
pub fn read_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        entries.push((entry.name().to_string(), content));
    }

    Ok(entries)
}
