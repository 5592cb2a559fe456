pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod http;
pub mod integrity;
pub mod loglist;
pub mod logging;
pub mod metrics;
pub mod route;
pub mod shutdown;
pub mod singleflight;

use std::sync::Arc;

use crate::archive::ArchiveIndex;
use crate::cache::entry_cache::EntryContentCache;
use crate::cache::zippart_cache::ZipPartCache;
use crate::config::Cli;
use crate::facade::Facade;
use crate::integrity::IntegrityGate;
use crate::loglist::LogListGenerator;
use crate::metrics::Metrics;

/// Everything the HTTP surface and the background refreshers share,
/// constructed once at startup.
pub struct Services {
    pub archive: Arc<ArchiveIndex>,
    pub integrity: Arc<IntegrityGate>,
    pub zip_cache: Arc<ZipPartCache>,
    pub entry_cache: Arc<EntryContentCache>,
    pub facade: Arc<Facade>,
    pub log_list: Arc<LogListGenerator>,
    pub metrics: Arc<Metrics>,
}

impl Services {
    /// Performs the synchronous startup sequence: discovers the archive,
    /// builds the caches, and runs the initial log-list refresh. A
    /// failure here is fatal.
    pub fn bootstrap(cli: &Cli) -> Result<Self, String> {
        cli.folder_prefix().map_err(|e| e.to_string())?;
        let metrics = Arc::new(Metrics::new());

        let archive = Arc::new(
            ArchiveIndex::discover(cli.archive_path.clone(), &cli.folder_pattern)
                .map_err(|e| e.to_string())?,
        );

        let integrity = Arc::new(IntegrityGate::new(cli.zip_integrity_fail_ttl, metrics.clone()));
        let zip_cache = Arc::new(ZipPartCache::new(
            cli.zip_cache_max_open,
            cli.zip_cache_max_concurrent_opens,
            metrics.clone(),
        ));
        let entry_cache = Arc::new(EntryContentCache::new(cli.entry_cache_max_bytes, metrics.clone()));
        let facade = Arc::new(Facade::new(zip_cache.clone(), entry_cache.clone(), integrity.clone()));
        let log_list = Arc::new(LogListGenerator::new(archive.clone()));

        metrics.discovered_logs.set(archive.snapshot().len() as i64);
        metrics
            .discovered_zip_parts
            .set(archive.snapshot().total_zip_parts() as i64);

        Ok(Self {
            archive,
            integrity,
            zip_cache,
            entry_cache,
            facade,
            log_list,
            metrics,
        })
    }

    /// Refreshes gauges that reflect current cache/archive occupancy;
    /// called after every background refresh tick.
    pub fn refresh_gauges(&self) {
        let snapshot = self.archive.snapshot();
        self.metrics.discovered_logs.set(snapshot.len() as i64);
        self.metrics
            .discovered_zip_parts
            .set(snapshot.total_zip_parts() as i64);
        self.metrics.open_zips.set(self.zip_cache.len() as i64);
        self.metrics.entry_cache_bytes.set(self.entry_cache.total_bytes() as i64);
        self.metrics.entry_cache_items.set(self.entry_cache.total_items() as i64);
    }
}
