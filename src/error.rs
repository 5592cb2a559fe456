//! The top-level HTTP error type: composes every subsystem's `thiserror`
//! enum and maps each to the opaque wire status clients see -- one enum
//! per subsystem, composed at the boundary that actually talks HTTP.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::facade::FacadeError;
use crate::route::RouteError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no route matches this request")]
    RouteNotFound,

    #[error("method not allowed on this route")]
    MethodNotAllowed,

    #[error("unknown log")]
    UnknownLog,

    #[error("zip part not available for this log")]
    PartNotAvailable,

    #[error("entry not found")]
    EntryNotFound,

    #[error("zip temporarily unavailable")]
    TemporarilyUnavailable,

    #[error("log-list refresh is currently unhealthy")]
    LogListUnhealthy,

    #[error("internal error")]
    Internal,
}

impl From<RouteError> for AppError {
    fn from(_: RouteError) -> Self {
        // Every route-parse failure is a 404 at the boundary; the
        // underlying reason is never surfaced to the client.
        AppError::RouteNotFound
    }
}

impl From<FacadeError> for AppError {
    fn from(e: FacadeError) -> Self {
        match e {
            FacadeError::NotFound => AppError::EntryNotFound,
            FacadeError::TemporarilyUnavailable => AppError::TemporarilyUnavailable,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::RouteNotFound
            | AppError::UnknownLog
            | AppError::PartNotAvailable
            | AppError::EntryNotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::TemporarilyUnavailable | AppError::LogListUnhealthy => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut response = (status, opaque_body(status)).into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}

/// Fixed, opaque bodies -- never the `Display` text of the triggering
/// error, which could leak filesystem paths to a client.
fn opaque_body(status: StatusCode) -> &'static str {
    match status {
        StatusCode::NOT_FOUND => "not found",
        StatusCode::METHOD_NOT_ALLOWED => "method not allowed",
        StatusCode::SERVICE_UNAVAILABLE => "temporarily unavailable",
        _ => "internal error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn method_not_allowed_carries_allow_header() {
        let response = AppError::MethodNotAllowed.into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, HEAD");
    }

    #[tokio::test]
    async fn body_never_leaks_internal_detail() {
        let response = AppError::TemporarilyUnavailable.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"temporarily unavailable");
    }
}
