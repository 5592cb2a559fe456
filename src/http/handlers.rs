//! Request dispatch. One handler for every path: parses the
//! route, enforces the GET/HEAD-only method policy, and serves each route
//! kind from the archive via the façade.

use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{error, info, warn};

use crate::archive::zippart;
use crate::error::AppError;
use crate::route::{self, Route};

use super::baseurl;
use super::AppState;

pub async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<tokio_listener::SomeSocketAddrClonable>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let path = uri.path();

    let route = match route::parse(path) {
        Ok(route) => route,
        Err(_) => {
            return log_and_respond(
                &state,
                &method,
                path,
                None,
                &headers,
                start,
                AppError::RouteNotFound.into_response(),
            );
        }
    };

    if !matches!(method, Method::GET | Method::HEAD) {
        let resp = AppError::MethodNotAllowed.into_response();
        return log_and_respond(&state, &method, path, route.log_name(), &headers, start, resp);
    }

    let log_name = route.log_name().map(str::to_string);
    let result = serve_route(&state, &route, path, &headers, &remote).await;

    let response = match result {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    };

    let response = if method == Method::HEAD {
        strip_body(response)
    } else {
        response
    };

    log_and_respond(&state, &method, path, log_name.as_deref(), &headers, start, response)
}

async fn serve_route(
    state: &AppState,
    route: &Route,
    original_path: &str,
    headers: &HeaderMap,
    remote: &tokio_listener::SomeSocketAddrClonable,
) -> Result<Response, AppError> {
    match route {
        Route::LogList => serve_log_list(state, headers, remote),
        Route::Metrics => Ok((
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            state.metrics.encode(),
        )
            .into_response()),
        Route::Checkpoint { log } => {
            serve_zip_entry(state, log, route, original_path, "text/plain; charset=utf-8").await
        }
        Route::LogInfo { log } => {
            serve_zip_entry(state, log, route, original_path, "application/json").await
        }
        Route::Issuer { log, .. } => {
            serve_zip_entry(state, log, route, original_path, "application/pkix-cert").await
        }
        Route::HashTile { log, .. } | Route::DataTile { log, .. } => {
            serve_zip_entry(state, log, route, original_path, "application/octet-stream").await
        }
    }
}

fn serve_log_list(
    state: &AppState,
    headers: &HeaderMap,
    remote: &tokio_listener::SomeSocketAddrClonable,
) -> Result<Response, AppError> {
    let timer = Instant::now();
    state.metrics.log_list_requests_total.inc();
    let snapshot = state.log_list.snapshot();
    if !snapshot.is_healthy() {
        return Err(AppError::LogListUnhealthy);
    }

    let base_url = baseurl::derive(remote_ip(remote), &state.trusted_sources, headers);
    let body = snapshot.render(&base_url).to_string();
    state
        .metrics
        .log_list_duration_seconds
        .observe(timer.elapsed().as_secs_f64());
    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

async fn serve_zip_entry(
    state: &AppState,
    log_name: &str,
    route: &Route,
    original_path: &str,
    content_type: &'static str,
) -> Result<Response, AppError> {
    let timer = Instant::now();
    let snapshot = state.archive.snapshot();
    let log = snapshot.get(log_name).ok_or(AppError::UnknownLog)?;

    let part = zippart::resolve(route, &log.zip_parts).ok_or(AppError::PartNotAvailable)?;
    let zip_path = log.zip_path(part);
    let entry_path = route
        .entry_path(original_path)
        .ok_or(AppError::RouteNotFound)?;

    let bytes = state.facade.open_entry(&zip_path, &entry_path).await?;

    state
        .metrics
        .log_requests_total
        .with_label_values(&[log_name])
        .inc();
    state
        .metrics
        .log_duration_seconds
        .with_label_values(&[log_name])
        .observe(timer.elapsed().as_secs_f64());

    Ok(([(axum::http::header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// Extracts the connecting IP from the listener's address enum. Unix-socket
/// peers (which carry no IP) fall through to `None`, which `baseurl::derive`
/// treats as untrusted.
fn remote_ip(remote: &tokio_listener::SomeSocketAddrClonable) -> Option<std::net::IpAddr> {
    match remote {
        tokio_listener::SomeSocketAddrClonable::Tcp(addr) => Some(addr.ip()),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn strip_body(response: Response) -> Response {
    let (parts, _) = response.into_parts();
    Response::from_parts(parts, axum::body::Body::empty())
}

fn log_and_respond(
    state: &AppState,
    method: &Method,
    path: &str,
    log: Option<&str>,
    headers: &HeaderMap,
    start: Instant,
    response: Response,
) -> Response {
    let status = response.status();
    let duration = start.elapsed();
    let x_forwarded_host = headers.get("x-forwarded-host").and_then(|v| v.to_str().ok());
    let x_forwarded_proto = headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok());

    if status.is_success() {
        if state.verbose {
            info!(
                method = %method, path, status = status.as_u16(), duration_ms = duration.as_millis(),
                log, x_forwarded_host, x_forwarded_proto, "request"
            );
        }
    } else if status.is_server_error() {
        error!(
            method = %method, path, status = status.as_u16(), duration_ms = duration.as_millis(),
            log, x_forwarded_host, x_forwarded_proto, "request"
        );
    } else {
        warn!(
            method = %method, path, status = status.as_u16(), duration_ms = duration.as_millis(),
            log, x_forwarded_host, x_forwarded_proto, "request"
        );
    }

    response
}
