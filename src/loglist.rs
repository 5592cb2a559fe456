//! The log-list generator: periodically builds a v3
//! discovery document from each log's `000.zip` and publishes it the same
//! way the archive index publishes snapshots -- an `Arc` behind a lock,
//! swapped atomically so readers never see a torn build.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::archive::ArchiveIndex;

const RETAINED_FIELDS: &[&str] = &["description", "log_id", "key", "mmd", "log_type", "state"];

#[derive(Debug, Clone)]
pub struct TiledLogRecord {
    pub log_name: String,
    /// The retained fields, carried over verbatim from `log.v3.json` --
    /// everything else, including `url`, is dropped.
    pub fields: Map<String, Value>,
    pub has_issuers: bool,
}

impl TiledLogRecord {
    fn render(&self, base_url: &str) -> Value {
        let mut obj = self.fields.clone();
        let log_url = format!("{base_url}/{}", self.log_name);
        obj.insert("submission_url".into(), Value::String(log_url.clone()));
        obj.insert("monitoring_url".into(), Value::String(log_url));
        obj.insert("has_issuers".into(), Value::Bool(self.has_issuers));
        Value::Object(obj)
    }
}

#[derive(Debug, Clone)]
pub struct LogListSnapshot {
    pub log_list_timestamp: SystemTime,
    pub tiled_logs: Vec<TiledLogRecord>,
    pub last_error: Option<String>,
}

impl LogListSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    /// Renders the full v3 document with URLs templated against `base_url`
    /// (e.g. `https://example.org`).
    pub fn render(&self, base_url: &str) -> Value {
        let tiled_logs: Vec<Value> = self.tiled_logs.iter().map(|l| l.render(base_url)).collect();

        let operator = serde_json::json!({
            "name": "ct-archive-serve",
            "email": Vec::<String>::new(),
            "logs": Vec::<Value>::new(),
            "tiled_logs": tiled_logs,
        });

        let timestamp = self
            .log_list_timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        serde_json::json!({
            "version": "3.0",
            "log_list_timestamp": timestamp,
            "operators": [operator],
        })
    }
}

#[derive(Serialize)]
struct ParsedLogV3 {
    #[serde(default)]
    description: Option<Value>,
    #[serde(default)]
    log_id: Option<Value>,
    #[serde(default)]
    key: Option<Value>,
    #[serde(default)]
    mmd: Option<Value>,
    #[serde(default)]
    log_type: Option<Value>,
    #[serde(default)]
    state: Option<Value>,
}

struct ExtractionCacheEntry {
    mtime: SystemTime,
    fields: Map<String, Value>,
    has_issuers: bool,
}

/// Builds and republishes [`LogListSnapshot`]s, owning the per-zip
/// extraction cache that avoids re-parsing `000.zip` on every refresh.
pub struct LogListGenerator {
    archive: Arc<ArchiveIndex>,
    snapshot: RwLock<Arc<LogListSnapshot>>,
    refresh_lock: Mutex<()>,
    extraction_cache: Mutex<HashMap<PathBuf, ExtractionCacheEntry>>,
}

impl LogListGenerator {
    /// Builds the initial snapshot synchronously at startup.
    pub fn new(archive: Arc<ArchiveIndex>) -> Self {
        let generator = Self {
            archive,
            snapshot: RwLock::new(Arc::new(LogListSnapshot {
                log_list_timestamp: SystemTime::now(),
                tiled_logs: Vec::new(),
                last_error: None,
            })),
            refresh_lock: Mutex::new(()),
            extraction_cache: Mutex::new(HashMap::new()),
        };
        generator.refresh();
        generator
    }

    pub fn snapshot(&self) -> Arc<LogListSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn refresh(&self) {
        let _guard = self.refresh_lock.lock();
        let archive_snapshot = self.archive.snapshot();
        let mut tiled_logs = Vec::new();
        let mut live_paths = std::collections::HashSet::new();

        for log_name in archive_snapshot.sorted_names() {
            let log = archive_snapshot.get(log_name).expect("name came from snapshot");
            if !log.zip_parts.contains(&0) {
                continue;
            }
            let part_zero = log.zip_path(0);
            live_paths.insert(part_zero.clone());

            match self.extract(&part_zero) {
                Ok((fields, has_issuers)) => {
                    tiled_logs.push(TiledLogRecord {
                        log_name: log_name.to_string(),
                        fields,
                        has_issuers,
                    });
                }
                Err(err) => {
                    warn!(log = log_name, err = %err, "omitting log from log-list: 000.zip unreadable");
                }
            }
        }

        self.extraction_cache
            .lock()
            .retain(|path, _| live_paths.contains(path));

        let last_error = if tiled_logs.is_empty() && !archive_snapshot.is_empty() {
            Some("no logs produced a readable log.v3.json".to_string())
        } else {
            None
        };
        if let Some(err) = &last_error {
            error!(err, "log-list refresh produced no usable entries");
        }

        *self.snapshot.write() = Arc::new(LogListSnapshot {
            log_list_timestamp: SystemTime::now(),
            tiled_logs,
            last_error,
        });
    }

    /// Extracts `log.v3.json` and detects `issuer/*` entries from a log's
    /// `000.zip` in a single pass, caching the result keyed by mtime.
    fn extract(&self, zip_path: &std::path::Path) -> Result<(Map<String, Value>, bool), String> {
        let mtime = std::fs::metadata(zip_path)
            .and_then(|m| m.modified())
            .map_err(|e| e.to_string())?;

        if let Some(cached) = self.extraction_cache.lock().get(zip_path) {
            if cached.mtime == mtime {
                return Ok((cached.fields.clone(), cached.has_issuers));
            }
        }

        let (fields, has_issuers) = extract_blocking(zip_path)?;
        self.extraction_cache.lock().insert(
            zip_path.to_path_buf(),
            ExtractionCacheEntry {
                mtime,
                fields: fields.clone(),
                has_issuers,
            },
        );
        Ok((fields, has_issuers))
    }
}

/// Single-pass scan of a zip's central directory: extracts `log.v3.json`
/// and checks for any `issuer/` entry without a second open-and-scan pass.
fn extract_blocking(zip_path: &std::path::Path) -> Result<(Map<String, Value>, bool), String> {
    let file = std::fs::File::open(zip_path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;

    let mut raw_json: Option<String> = None;
    let mut has_issuers = false;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| e.to_string())?;
        if entry.name() == "log.v3.json" {
            use std::io::Read;
            let mut buf = String::new();
            entry.read_to_string(&mut buf).map_err(|e| e.to_string())?;
            raw_json = Some(buf);
        } else if entry.name().starts_with("issuer/") {
            has_issuers = true;
        }
    }

    let raw_json = raw_json.ok_or_else(|| "missing log.v3.json".to_string())?;
    let parsed: ParsedLogV3 = serde_json::from_str(&raw_json).map_err(|e| e.to_string())?;
    let as_value = serde_json::to_value(&parsed).map_err(|e| e.to_string())?;
    let mut fields = Map::new();
    if let Value::Object(map) = as_value {
        for key in RETAINED_FIELDS {
            if let Some(v) = map.get(*key).filter(|v| !v.is_null()) {
                fields.insert((*key).to_string(), v.clone());
            }
        }
    }
    Ok((fields, has_issuers))
}
