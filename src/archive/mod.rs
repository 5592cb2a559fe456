//! The archive index: discovers per-log folders and their zip parts, and
//! publishes immutable snapshots that the request path reads without ever
//! touching the filesystem.
//!
//! Snapshot publication uses shared mutable state protected by
//! `parking_lot`: an `Arc` behind a lock, cloned out under a brief read
//! lock so readers never block on, or observe a partial, rebuild.

pub mod zippart;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Log names are capped at this many characters; longer names are
/// truncated before deduplication.
pub const MAX_LOG_NAME_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read archive root {path}: {source}")]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("log name collision: {log_name} claimed by both {a} and {b}")]
    NameCollision {
        log_name: String,
        a: String,
        b: String,
    },
    #[error("invalid folder pattern {0:?}: must be `<prefix>*`")]
    InvalidPattern(String),
}

/// One discovered per-log folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLog {
    pub log_name: String,
    pub folder_path: PathBuf,
    pub zip_parts: Vec<u32>,
    pub first_discovered: SystemTime,
}

impl ArchiveLog {
    pub fn zip_path(&self, part: u32) -> PathBuf {
        self.folder_path.join(format!("{part:03}.zip"))
    }
}

/// Immutable `log_name -> ArchiveLog` mapping, published atomically.
#[derive(Debug, Default)]
pub struct ArchiveSnapshot {
    logs: HashMap<String, ArchiveLog>,
}

impl ArchiveSnapshot {
    pub fn get(&self, log_name: &str) -> Option<&ArchiveLog> {
        self.logs.get(log_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchiveLog> {
        self.logs.values()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn total_zip_parts(&self) -> usize {
        self.logs.values().map(|l| l.zip_parts.len()).sum()
    }

    /// Names sorted ascending, matching the log-list's deterministic
    /// ordering requirement.
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.logs.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Owns the current snapshot. A mutex serializes refreshes so a slow scan
/// cannot overlap another.
pub struct ArchiveIndex {
    root: PathBuf,
    prefix: String,
    snapshot: RwLock<Arc<ArchiveSnapshot>>,
    refresh_lock: Mutex<()>,
}

impl ArchiveIndex {
    /// Builds the initial snapshot synchronously. A startup failure here
    /// (unreadable root, name collision) is fatal.
    pub fn discover(root: PathBuf, pattern: &str) -> Result<Self, IndexError> {
        let prefix = parse_pattern(pattern)?;
        let snapshot = scan(&root, &prefix, None)?;
        info!(
            logs = snapshot.len(),
            zip_parts = snapshot.total_zip_parts(),
            "archive index discovered"
        );
        Ok(Self {
            root,
            prefix,
            snapshot: RwLock::new(Arc::new(snapshot)),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<ArchiveSnapshot> {
        self.snapshot.read().clone()
    }

    /// Re-scans the archive root. On error, logs and keeps the previous
    /// snapshot in effect -- a background refresh failure is never fatal.
    #[instrument(skip(self))]
    pub fn refresh(&self) {
        let _guard = self.refresh_lock.lock();
        let previous = self.snapshot();
        match scan(&self.root, &self.prefix, Some(&previous)) {
            Ok(new_snapshot) => {
                info!(
                    logs = new_snapshot.len(),
                    zip_parts = new_snapshot.total_zip_parts(),
                    "archive index refreshed"
                );
                *self.snapshot.write() = Arc::new(new_snapshot);
            }
            Err(err) => {
                error!(err = %err, "archive refresh failed, keeping previous snapshot");
            }
        }
    }
}

fn parse_pattern(pattern: &str) -> Result<String, IndexError> {
    pattern
        .strip_suffix('*')
        .filter(|prefix| !prefix.is_empty())
        .map(|p| p.to_string())
        .ok_or_else(|| IndexError::InvalidPattern(pattern.to_string()))
}

fn scan(
    root: &Path,
    prefix: &str,
    previous: Option<&ArchiveSnapshot>,
) -> Result<ArchiveSnapshot, IndexError> {
    let entries = std::fs::read_dir(root).map_err(|source| IndexError::ReadRoot {
        path: root.to_path_buf(),
        source,
    })?;

    let mut logs: HashMap<String, ArchiveLog> = HashMap::new();
    let mut claimed_by: HashMap<String, String> = HashMap::new();
    let now = SystemTime::now();

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(err = %err, "failed to read archive root entry, skipping");
                continue;
            }
        };

        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };
        if !file_type.is_dir() {
            continue;
        }

        let folder_name = entry.file_name();
        let folder_name = match folder_name.to_str() {
            Some(s) => s,
            None => continue,
        };

        let Some(mut log_name) = folder_name.strip_prefix(prefix).map(str::to_string) else {
            continue;
        };
        if log_name.is_empty() {
            continue;
        }
        if let Some((byte_idx, _)) = log_name.char_indices().nth(MAX_LOG_NAME_LEN) {
            log_name.truncate(byte_idx);
        }

        if let Some(existing_folder) = claimed_by.get(&log_name) {
            return Err(IndexError::NameCollision {
                log_name,
                a: existing_folder.clone(),
                b: folder_name.to_string(),
            });
        }

        let folder_path = entry.path();
        let zip_parts = enumerate_zip_parts(&folder_path);
        let has_zero_part = zip_parts.contains(&0);

        let previous_first_discovered = previous
            .and_then(|snap| snap.get(&log_name))
            .map(|l| l.first_discovered);
        let first_discovered = match previous_first_discovered {
            // Already observed a `000.zip` in an earlier scan; keep it.
            Some(ts) if ts != SystemTime::UNIX_EPOCH => ts,
            // First scan to see a `000.zip` for this log, whether brand
            // new or previously zip-part-less.
            _ if has_zero_part => now,
            // No `000.zip` yet; not "discovered" in the spec's sense.
            _ => SystemTime::UNIX_EPOCH,
        };

        claimed_by.insert(log_name.clone(), folder_name.to_string());
        logs.insert(
            log_name.clone(),
            ArchiveLog {
                log_name,
                folder_path,
                zip_parts,
                first_discovered,
            },
        );
    }

    Ok(ArchiveSnapshot { logs })
}

/// Collects the sorted, deduplicated set of `NNN.zip` part numbers in a
/// log folder. Malformed or unreadable entries are skipped silently --
/// they are not part of the archive's contract.
fn enumerate_zip_parts(folder: &Path) -> Vec<u32> {
    let mut parts = HashSet::new();
    let Ok(entries) = std::fs::read_dir(folder) else {
        return Vec::new();
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(part) = parse_zip_part_name(name) {
            parts.insert(part);
        }
    }
    let mut parts: Vec<u32> = parts.into_iter().collect();
    parts.sort_unstable();
    parts
}

/// Matches exactly `DDD.zip` where `DDD` is three decimal digits.
fn parse_zip_part_name(name: &str) -> Option<u32> {
    let digits = name.strip_suffix(".zip")?;
    if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
