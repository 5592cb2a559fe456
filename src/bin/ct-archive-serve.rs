use std::sync::Arc;

use clap::Parser;
use ct_archive_serve::config::Cli;
use ct_archive_serve::http::{gen_router, AppState};
use ct_archive_serve::shutdown::shutdown_signal;
use ct_archive_serve::Services;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _logging = ct_archive_serve::logging::init(cli.debug);

    let services = match Services::bootstrap(&cli) {
        Ok(s) => Arc::new(s),
        Err(err) => {
            error!(err, "startup failed");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    spawn_archive_refresher(&services, &cli, cancel.clone());
    spawn_log_list_refresher(&services, &cli, cancel.clone());

    let state = AppState {
        archive: services.archive.clone(),
        facade: services.facade.clone(),
        integrity: services.integrity.clone(),
        log_list: services.log_list.clone(),
        metrics: services.metrics.clone(),
        trusted_sources: Arc::new(cli.http_trusted_sources.clone()),
        verbose: cli.verbose,
    };

    let app = gen_router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listen_address = parse_listen_address(&cli.listen_address);
    let listener = match tokio_listener::Listener::bind(
        &listen_address,
        &Default::default(),
        &Default::default(),
    )
    .await
    {
        Ok(l) => l,
        Err(err) => {
            error!(err = %err, address = %cli.listen_address, "failed to bind listen address");
            std::process::exit(1);
        }
    };

    info!(address = %cli.listen_address, "ct-archive-serve listening");

    let serve = tokio_listener::axum07::serve(
        listener,
        app.into_make_service_with_connect_info::<tokio_listener::SomeSocketAddrClonable>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel.clone()));

    if let Err(err) = tokio::time::timeout(cli.shutdown_timeout + std::time::Duration::from_secs(1), serve)
        .await
        .unwrap_or(Ok(()))
    {
        error!(err = %err, "server exited with error");
        std::process::exit(1);
    }
}

fn parse_listen_address(s: &str) -> tokio_listener::ListenerAddress {
    s.parse()
        .unwrap_or_else(|_| panic!("invalid listen address {s:?}"))
}

fn spawn_archive_refresher(services: &Arc<Services>, cli: &Cli, cancel: CancellationToken) {
    let services = services.clone();
    let interval = cli.archive_refresh_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; startup already refreshed once
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    services.archive.refresh();
                    services.refresh_gauges();
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}

fn spawn_log_list_refresher(services: &Arc<Services>, cli: &Cli, cancel: CancellationToken) {
    let log_list = services.log_list.clone();
    let interval = cli.log_list_refresh_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => log_list.refresh(),
                _ = cancel.cancelled() => break,
            }
        }
    });
}
