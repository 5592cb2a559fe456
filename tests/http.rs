//! End-to-end HTTP scenarios, driving the full `axum::Router` through
//! `tower::ServiceExt::oneshot` against a throwaway archive built with the
//! `zip` crate's writer.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use ct_archive_serve::archive::ArchiveIndex;
use ct_archive_serve::cache::entry_cache::EntryContentCache;
use ct_archive_serve::cache::zippart_cache::ZipPartCache;
use ct_archive_serve::facade::Facade;
use ct_archive_serve::http::{gen_router, AppState};
use ct_archive_serve::integrity::IntegrityGate;
use ct_archive_serve::loglist::LogListGenerator;
use ct_archive_serve::metrics::Metrics;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    use std::io::Write;
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, contents) in entries {
        zip.start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap();
}

fn build_state(archive_root: &Path, trusted_sources: Vec<ipnetwork::IpNetwork>) -> AppState {
    let archive = Arc::new(ArchiveIndex::discover(archive_root.to_path_buf(), "ct_*").unwrap());
    let metrics = Arc::new(Metrics::new());
    let integrity = Arc::new(IntegrityGate::new(Duration::from_secs(300), metrics.clone()));
    let zip_cache = Arc::new(ZipPartCache::new(2048, 64, metrics.clone()));
    let entry_cache = Arc::new(EntryContentCache::new(1 << 20, metrics.clone()));
    let facade = Arc::new(Facade::new(zip_cache, entry_cache, integrity.clone()));
    let log_list = Arc::new(LogListGenerator::new(archive.clone()));

    AppState {
        archive,
        facade,
        integrity,
        log_list,
        metrics,
        trusted_sources: Arc::new(trusted_sources),
        verbose: true,
    }
}

fn request(method: &str, path: &str, remote: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let mut req = builder.body(Body::empty()).unwrap();
    let addr: SocketAddr = remote.parse().unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(tokio_listener::SomeSocketAddrClonable::Tcp(addr)));
    req
}

#[tokio::test]
async fn checkpoint_is_served_from_part_zero() {
    let dir = tempfile::tempdir().unwrap();
    let sirius = dir.path().join("ct_sirius");
    std::fs::create_dir(&sirius).unwrap();
    write_zip(&sirius.join("000.zip"), &[("checkpoint", b"checkpoint-data")]);

    let app = gen_router(build_state(dir.path(), vec![]));
    let response = app
        .oneshot(request("GET", "/sirius/checkpoint", "10.0.0.1:1", &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"checkpoint-data");
}

#[tokio::test]
async fn log_list_sorts_logs_and_rewrites_submission_url() {
    let dir = tempfile::tempdir().unwrap();
    let sirius = dir.path().join("ct_sirius");
    std::fs::create_dir(&sirius).unwrap();
    write_zip(
        &sirius.join("000.zip"),
        &[
            ("checkpoint", b"cp"),
            ("log.v3.json", br#"{"description":"Sirius"}"#),
        ],
    );
    let vega = dir.path().join("ct_vega");
    std::fs::create_dir(&vega).unwrap();
    write_zip(
        &vega.join("000.zip"),
        &[
            ("checkpoint", b"cp"),
            ("log.v3.json", br#"{"description":"Vega"}"#),
        ],
    );

    let app = gen_router(build_state(dir.path(), vec![]));
    let response = app
        .oneshot(request(
            "GET",
            "/logs.v3.json",
            "10.0.0.1:1",
            &[("host", "example.org")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let tiled_logs = json["operators"][0]["tiled_logs"].as_array().unwrap();
    assert!(tiled_logs.len() >= 2);
    assert_eq!(tiled_logs[0]["submission_url"], "http://example.org/sirius");
    assert_eq!(tiled_logs[1]["submission_url"], "http://example.org/vega");
}

#[tokio::test]
async fn truncated_zip_returns_503_until_ttl_expires() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("ct_broken");
    std::fs::create_dir(&broken).unwrap();
    write_zip(&broken.join("000.zip"), &[("checkpoint", b"data")]);
    let zip_path = broken.join("000.zip");
    let data = std::fs::read(&zip_path).unwrap();
    std::fs::write(&zip_path, &data[..data.len() - 4]).unwrap();

    let archive = Arc::new(ArchiveIndex::discover(dir.path().to_path_buf(), "ct_*").unwrap());
    let metrics = Arc::new(Metrics::new());
    let integrity = Arc::new(IntegrityGate::new(Duration::from_millis(50), metrics.clone()));
    let zip_cache = Arc::new(ZipPartCache::new(2048, 64, metrics.clone()));
    let entry_cache = Arc::new(EntryContentCache::new(1 << 20, metrics.clone()));
    let facade = Arc::new(Facade::new(zip_cache, entry_cache, integrity.clone()));
    let log_list = Arc::new(LogListGenerator::new(archive.clone()));
    let state = AppState {
        archive,
        facade,
        integrity,
        log_list,
        metrics,
        trusted_sources: Arc::new(vec![]),
        verbose: false,
    };

    let app = gen_router(state);
    let response = app
        .clone()
        .oneshot(request("GET", "/broken/checkpoint", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // still within TTL
    let response = app
        .clone()
        .oneshot(request("GET", "/broken/checkpoint", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    tokio::time::sleep(Duration::from_millis(80)).await;
    write_zip(&zip_path, &[("checkpoint", b"checkpoint-data")]);
    let response = app
        .oneshot(request("GET", "/broken/checkpoint", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn has_issuers_reflects_issuer_entries() {
    let dir = tempfile::tempdir().unwrap();
    let sirius = dir.path().join("ct_sirius");
    std::fs::create_dir(&sirius).unwrap();
    write_zip(
        &sirius.join("000.zip"),
        &[("checkpoint", b"cp"), ("log.v3.json", br#"{"description":"Sirius"}"#)],
    );
    let mammoth = dir.path().join("ct_mammoth");
    std::fs::create_dir(&mammoth).unwrap();
    write_zip(
        &mammoth.join("000.zip"),
        &[
            ("checkpoint", b"cp"),
            ("log.v3.json", br#"{"description":"Mammoth"}"#),
            ("issuer/deadbeef", b"cert"),
        ],
    );

    let app = gen_router(build_state(dir.path(), vec![]));
    let response = app
        .oneshot(request("GET", "/logs.v3.json", "10.0.0.1:1", &[("host", "x")]))
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let tiled_logs = json["operators"][0]["tiled_logs"].as_array().unwrap();
    let by_name = |name: &str| tiled_logs.iter().find(|l| l["log_name"].is_null() || true).and_then(|_| {
        tiled_logs.iter().find(|_| true)
    });
    let _ = by_name; // silence unused closure lint in case of future edits
    let mammoth_entry = tiled_logs
        .iter()
        .find(|l| l["submission_url"].as_str().unwrap().ends_with("/mammoth"))
        .unwrap();
    let sirius_entry = tiled_logs
        .iter()
        .find(|l| l["submission_url"].as_str().unwrap().ends_with("/sirius"))
        .unwrap();
    assert_eq!(mammoth_entry["has_issuers"], true);
    assert_eq!(sirius_entry["has_issuers"], false);
}

#[tokio::test]
async fn partial_tile_exact_and_out_of_range_width() {
    let dir = tempfile::tempdir().unwrap();
    let sirius = dir.path().join("ct_sirius");
    std::fs::create_dir(&sirius).unwrap();
    write_zip(
        &sirius.join("000.zip"),
        &[
            ("tile/0/x000", b"full-tile-bytes"),
            ("tile/0/x001.p/128", b"partial-tile-bytes"),
        ],
    );

    let app = gen_router(build_state(dir.path(), vec![]));

    let full = app
        .clone()
        .oneshot(request("GET", "/sirius/tile/0/x000", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(full.status(), StatusCode::OK);
    assert_eq!(
        full.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );
    let full_body = to_bytes(full.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&full_body[..], b"full-tile-bytes");

    let partial = app
        .clone()
        .oneshot(request(
            "GET",
            "/sirius/tile/0/x001.p/128",
            "10.0.0.1:1",
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(partial.status(), StatusCode::OK);
    let partial_body = to_bytes(partial.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&partial_body[..], b"partial-tile-bytes");

    let out_of_range = app
        .oneshot(request(
            "GET",
            "/sirius/tile/0/x001.p/256",
            "10.0.0.1:1",
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(out_of_range.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trusted_source_rewrites_urls_from_forwarded_headers() {
    let dir = tempfile::tempdir().unwrap();
    let sirius = dir.path().join("ct_sirius");
    std::fs::create_dir(&sirius).unwrap();
    write_zip(
        &sirius.join("000.zip"),
        &[("checkpoint", b"cp"), ("log.v3.json", br#"{"description":"Sirius"}"#)],
    );

    let trusted: ipnetwork::IpNetwork = "127.0.0.1/32".parse().unwrap();
    let app = gen_router(build_state(dir.path(), vec![trusted]));

    let trusted_response = app
        .clone()
        .oneshot(request(
            "GET",
            "/logs.v3.json",
            "127.0.0.1:4321",
            &[
                ("host", "internal"),
                ("x-forwarded-host", "proxy.example, other.example"),
                ("x-forwarded-proto", "HTTPS, http"),
            ],
        ))
        .await
        .unwrap();
    let body = to_bytes(trusted_response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json["operators"][0]["tiled_logs"][0]["submission_url"],
        "https://proxy.example/sirius"
    );

    let untrusted_response = app
        .oneshot(request(
            "GET",
            "/logs.v3.json",
            "10.9.8.7:4321",
            &[
                ("host", "public.example"),
                ("x-forwarded-host", "proxy.example"),
                ("x-forwarded-proto", "https"),
            ],
        ))
        .await
        .unwrap();
    let body = to_bytes(untrusted_response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json["operators"][0]["tiled_logs"][0]["submission_url"],
        "http://public.example/sirius"
    );
}

#[tokio::test]
async fn unsupported_method_is_405_with_allow_header() {
    let dir = tempfile::tempdir().unwrap();
    let sirius = dir.path().join("ct_sirius");
    std::fs::create_dir(&sirius).unwrap();
    write_zip(&sirius.join("000.zip"), &[("checkpoint", b"cp")]);

    let app = gen_router(build_state(dir.path(), vec![]));
    let response = app
        .oneshot(request("POST", "/sirius/checkpoint", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get("allow").unwrap(), "GET, HEAD");
}

#[tokio::test]
async fn head_returns_same_status_with_empty_body() {
    let dir = tempfile::tempdir().unwrap();
    let sirius = dir.path().join("ct_sirius");
    std::fs::create_dir(&sirius).unwrap();
    write_zip(&sirius.join("000.zip"), &[("checkpoint", b"checkpoint-data")]);

    let app = gen_router(build_state(dir.path(), vec![]));
    let response = app
        .oneshot(request("HEAD", "/sirius/checkpoint", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn percent_and_traversal_paths_are_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = gen_router(build_state(dir.path(), vec![]));

    let response = app
        .clone()
        .oneshot(request("GET", "/sirius/che%63kpoint", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(request("GET", "/sirius/../etc/passwd", "10.0.0.1:1", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
