//! The zip integrity gate: decides whether a zip path is structurally
//! usable before any read is attempted against it, with pass/fail caching
//! and singleflight-deduplicated verification.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::warn;

use crate::metrics::Metrics;
use crate::singleflight::SingleFlight;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    Ok,
    NotFound,
    TemporarilyUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifyOutcome {
    Ok,
    NotFound,
    Invalid,
}

pub struct IntegrityGate {
    passed: RwLock<HashSet<PathBuf>>,
    failed: RwLock<HashMap<PathBuf, Instant>>,
    singleflight: SingleFlight<PathBuf, VerifyOutcome>,
    fail_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl IntegrityGate {
    pub fn new(fail_ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            passed: RwLock::new(HashSet::new()),
            failed: RwLock::new(HashMap::new()),
            singleflight: SingleFlight::new(),
            fail_ttl,
            metrics,
        }
    }

    /// Checks whether `path` is currently usable, verifying it if this is
    /// the first time we've seen it (or its previous failure has expired).
    pub async fn check(&self, path: &Path) -> IntegrityStatus {
        if self.passed.read().contains(path) {
            return IntegrityStatus::Ok;
        }

        // Only upgrade to a write lock if the path is actually present in
        // `failed`.
        let expired = {
            let failed = self.failed.read();
            match failed.get(path) {
                Some(expiry) if Instant::now() < *expiry => {
                    return IntegrityStatus::TemporarilyUnavailable;
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.failed.write().remove(path);
        }

        let path_buf = path.to_path_buf();
        let outcome = self
            .singleflight
            .do_once(path_buf.clone(), move || verify_zip(path_buf))
            .await;

        match outcome {
            VerifyOutcome::Ok => {
                self.passed.write().insert(path.to_path_buf());
                self.failed.write().remove(path);
                self.metrics.integrity_passed_total.inc();
                IntegrityStatus::Ok
            }
            VerifyOutcome::NotFound => IntegrityStatus::NotFound,
            VerifyOutcome::Invalid => {
                self.failed
                    .write()
                    .insert(path.to_path_buf(), Instant::now() + self.fail_ttl);
                self.metrics.integrity_failed_total.inc();
                IntegrityStatus::TemporarilyUnavailable
            }
        }
    }

    /// Called by higher layers when a downstream read error implies a
    /// previously-passed zip is now bad.
    pub fn invalidate_passed(&self, path: &Path) {
        if self.passed.write().remove(path) {
            warn!(path = %path.display(), "invalidated passed integrity state after read failure");
        }
    }
}

/// Opens the zip and parses its end-of-central-directory record and central
/// directory, without decompressing any entry. Runs on a blocking thread
/// since it's synchronous filesystem I/O.
async fn verify_zip(path: PathBuf) -> VerifyOutcome {
    tokio::task::spawn_blocking(move || verify_zip_blocking(&path))
        .await
        .unwrap_or(VerifyOutcome::Invalid)
}

fn verify_zip_blocking(path: &Path) -> VerifyOutcome {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return VerifyOutcome::NotFound,
        Err(_) => return VerifyOutcome::Invalid,
    };

    match zip::ZipArchive::new(file) {
        Ok(archive) if archive.len() > 0 => VerifyOutcome::Ok,
        Ok(_) => VerifyOutcome::Invalid,
        Err(_) => VerifyOutcome::Invalid,
    }
}
