//! The zip reader façade: the single entry point request
//! handlers use to read zip entry bytes, orchestrating the entry cache, the
//! zip-part cache and the integrity gate in fast-to-slow order.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::error;

use crate::archive::ArchiveIndex;
use crate::cache::entry_cache::EntryContentCache;
use crate::cache::zippart_cache::{CachedZip, OpenError, ZipPartCache};
use crate::integrity::{IntegrityGate, IntegrityStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeError {
    NotFound,
    TemporarilyUnavailable,
}

/// Holds references to the integrity gate and both caches; none of those
/// hold a back-reference to the façade, so there's no cyclic ownership.
pub struct Facade {
    zip_cache: Arc<ZipPartCache>,
    entry_cache: Arc<EntryContentCache>,
    integrity: Arc<IntegrityGate>,
}

impl Facade {
    pub fn new(
        zip_cache: Arc<ZipPartCache>,
        entry_cache: Arc<EntryContentCache>,
        integrity: Arc<IntegrityGate>,
    ) -> Self {
        Self {
            zip_cache,
            entry_cache,
            integrity,
        }
    }

    /// Returns the bytes of `entry_name` inside the zip at `zip_path`.
    pub async fn open_entry(&self, zip_path: &Path, entry_name: &str) -> Result<Bytes, FacadeError> {
        let zip_key = zip_path.to_string_lossy().into_owned();

        if let Some(bytes) = self.entry_cache.get(&zip_key, entry_name) {
            return Ok(bytes);
        }

        // A true zip-part cache hit: read straight through it, no stat or
        // integrity check needed.
        if let Some(cached) = self.zip_cache.peek(zip_path) {
            return self.read_from_cached(cached, zip_path, &zip_key, entry_name);
        }

        // Cold path: the zip isn't cached yet. Stat it, then run it
        // through the integrity gate -- a zip with a cached failure
        // returns 503 here without the file ever being opened -- before
        // attempting to open and cache it.
        match std::fs::metadata(zip_path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FacadeError::NotFound),
            Err(_) => return Err(FacadeError::TemporarilyUnavailable),
        }

        match self.integrity.check(zip_path).await {
            IntegrityStatus::NotFound => return Err(FacadeError::NotFound),
            IntegrityStatus::TemporarilyUnavailable => {
                return Err(FacadeError::TemporarilyUnavailable)
            }
            IntegrityStatus::Ok => {}
        }

        match self.zip_cache.get(zip_path).await {
            Ok(cached) => self.read_from_cached(cached, zip_path, &zip_key, entry_name),
            Err(OpenError::NotFound) => Err(FacadeError::NotFound),
            Err(OpenError::Invalid(_)) => Err(FacadeError::NotFound),
        }
    }

    /// Reads `entry_name` out of an already-open, already-cached reader
    /// (whether obtained via a cache hit or just opened on the cold path).
    fn read_from_cached(
        &self,
        cached: CachedZip,
        zip_path: &Path,
        zip_key: &str,
        entry_name: &str,
    ) -> Result<Bytes, FacadeError> {
        let read_result = {
            let mut archive = cached.lock();
            read_entry(&mut archive, entry_name)
        };

        match read_result {
            Ok(Some(bytes)) => {
                self.entry_cache.put(zip_key, entry_name, bytes.clone());
                Ok(bytes)
            }
            Ok(None) => Err(FacadeError::NotFound),
            Err(()) => {
                // A read-time failure against a cached reader means the
                // part is corrupt despite passing the cheaper integrity
                // check; force re-verification next time.
                error!(zip = zip_key, entry = entry_name, "entry read failed against cached zip reader");
                self.zip_cache.remove(zip_path);
                self.integrity.invalidate_passed(zip_path);
                Err(FacadeError::TemporarilyUnavailable)
            }
        }
    }
}

/// Reads `entry_name` out of an already-open archive. `Ok(None)` means the
/// entry simply isn't present; `Err(())` means the entry exists but its
/// compressed data is corrupt.
fn read_entry(
    archive: &mut zip::ZipArchive<std::fs::File>,
    entry_name: &str,
) -> Result<Option<Bytes>, ()> {
    let mut file = match archive.by_name(entry_name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(_) => return Err(()),
    };
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf).map_err(|_| ())?;
    Ok(Some(Bytes::from(buf)))
}

/// Convenience used by the HTTP layer and the log-list generator: resolves
/// a log's `000.zip` path without going through route/zip-part selection.
pub fn part_zero_path(archive: &ArchiveIndex, log_name: &str) -> Option<PathBuf> {
    let snapshot = archive.snapshot();
    let log = snapshot.get(log_name)?;
    log.zip_parts.contains(&0).then(|| log.zip_path(0))
}
