//! Public base URL derivation: decides whether to trust
//! `X-Forwarded-Host`/`X-Forwarded-Proto` based on the request's source IP,
//! falling back to the `Host` header and plain `http`.

use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;

/// Derives `<scheme>://<host>` for the current request, with no path and
/// no trailing slash.
pub fn derive(remote_ip: Option<IpAddr>, trusted_sources: &[IpNetwork], headers: &HeaderMap) -> String {
    let trusted =
        remote_ip.is_some_and(|ip| trusted_sources.iter().any(|net| net.contains(ip)));

    if trusted {
        if let (Some(host), Some(scheme)) = (
            first_forwarded_value(headers, "x-forwarded-host"),
            first_forwarded_value(headers, "x-forwarded-proto"),
        ) {
            return format!("{}://{}", scheme.to_lowercase(), host);
        }
    }

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    format!("http://{host}")
}

/// Takes a (possibly comma-separated) header value and returns the first
/// non-empty element after trimming ASCII whitespace.
fn first_forwarded_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(name)?.to_str().ok()?;
    raw.split(',')
        .map(|s| s.trim_matches(|c: char| c.is_ascii_whitespace()))
        .find(|s| !s.is_empty())
}
