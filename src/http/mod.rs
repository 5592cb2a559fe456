//! The HTTP surface: a single catch-all route that parses every incoming
//! path through [`crate::route`], since the route shapes (arbitrary-length
//! groups-of-three tile paths) don't fit axum's static path-segment
//! matching. `gen_router` is a free function building one
//! `Router<AppState>`; `AppState` is an `Arc`-cloneable struct of shared
//! services.

pub mod baseurl;
pub mod handlers;

use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use ipnetwork::IpNetwork;

use crate::archive::ArchiveIndex;
use crate::facade::Facade;
use crate::integrity::IntegrityGate;
use crate::loglist::LogListGenerator;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub archive: Arc<ArchiveIndex>,
    pub facade: Arc<Facade>,
    pub integrity: Arc<IntegrityGate>,
    pub log_list: Arc<LogListGenerator>,
    pub metrics: Arc<Metrics>,
    pub trusted_sources: Arc<Vec<IpNetwork>>,
    pub verbose: bool,
}

pub fn gen_router(state: AppState) -> Router {
    Router::new()
        .route("/*path", any(handlers::dispatch))
        .route("/", any(handlers::dispatch))
        .with_state(state)
}
