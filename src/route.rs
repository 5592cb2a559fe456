//! Parses a request path into a [`Route`], or rejects it outright.
//!
//! A total parse function, a `thiserror` error enum for why it failed, and
//! an enum describing the only shapes a caller can hand back to HTTP.

use thiserror::Error;

/// Why a path failed to parse into a [`Route`]. Every variant maps to a 404
/// at the HTTP boundary; callers should not expose the variant to clients.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("path contains a percent-encoded or traversal segment")]
    Unsafe,
    #[error("no route matches this path")]
    NoMatch,
    #[error("invalid tile coordinate")]
    InvalidCoordinate,
    #[error("tile index overflowed a 64-bit integer")]
    IndexOverflow,
}

/// A parsed, tagged request shape. `entry_path` (where present) is the
/// verbatim string to look up inside a zip's central directory -- it is
/// never reconstructed from decoded coordinates, only sliced from the
/// original path, per the "partial tiles are preserved literally" rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    LogList,
    Metrics,
    Checkpoint {
        log: String,
    },
    LogInfo {
        log: String,
    },
    Issuer {
        log: String,
        fingerprint: String,
    },
    HashTile {
        log: String,
        level: u8,
        index: u64,
        is_partial: bool,
        partial_width: Option<u8>,
    },
    DataTile {
        log: String,
        index: u64,
        is_partial: bool,
        partial_width: Option<u8>,
    },
}

impl Route {
    /// The log this route concerns, if any (`LogList`/`Metrics` have none).
    pub fn log_name(&self) -> Option<&str> {
        match self {
            Route::LogList | Route::Metrics => None,
            Route::Checkpoint { log }
            | Route::LogInfo { log }
            | Route::Issuer { log, .. }
            | Route::HashTile { log, .. }
            | Route::DataTile { log, .. } => Some(log),
        }
    }

    /// The verbatim in-zip entry name for routes backed by a zip entry.
    pub fn entry_path(&self, original_path: &str) -> Option<String> {
        match self {
            Route::LogList | Route::Metrics => None,
            _ => {
                // Everything after the leading `/<log>/` is the entry path,
                // untouched -- including any literal `.p/<W>` suffix.
                let rest = original_path.splitn(3, '/').nth(2)?;
                Some(rest.to_string())
            }
        }
    }
}

/// Parse `path` (as taken verbatim from the HTTP request line) into a
/// [`Route`]. No percent-decoding is ever performed: a `%` anywhere in the
/// path is rejected outright, as is a `..` substring.
pub fn parse(path: &str) -> Result<Route, RouteError> {
    if path.contains('%') || path.contains("..") {
        return Err(RouteError::Unsafe);
    }

    let path = path.strip_prefix('/').ok_or(RouteError::NoMatch)?;

    if path == "logs.v3.json" {
        return Ok(Route::LogList);
    }
    if path == "metrics" {
        return Ok(Route::Metrics);
    }

    let mut segments = path.split('/');
    let log = segments.next().ok_or(RouteError::NoMatch)?;
    if log.is_empty() || log == "." || log == ".." {
        return Err(RouteError::NoMatch);
    }
    let log = log.to_string();

    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return Err(RouteError::NoMatch);
    }

    match rest.as_slice() {
        ["checkpoint"] => Ok(Route::Checkpoint { log }),
        ["log.v3.json"] => Ok(Route::LogInfo { log }),
        ["issuer", fp] => {
            if fp.is_empty() || !fp.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
                return Err(RouteError::NoMatch);
            }
            Ok(Route::Issuer {
                log,
                fingerprint: fp.to_string(),
            })
        }
        ["tile", "data", n_segs @ ..] => {
            let (index, is_partial, partial_width) = parse_tile_tail(n_segs)?;
            Ok(Route::DataTile {
                log,
                index,
                is_partial,
                partial_width,
            })
        }
        ["tile", level_str, n_segs @ ..] => {
            let level: u8 = level_str.parse().map_err(|_| RouteError::NoMatch)?;
            let (index, is_partial, partial_width) = parse_tile_tail(n_segs)?;
            Ok(Route::HashTile {
                log,
                level,
                index,
                is_partial,
                partial_width,
            })
        }
        _ => Err(RouteError::NoMatch),
    }
}

/// Splits the `<N…>[.p/<W>]` tail of a tile path into its decoded index,
/// whether it's a partial tile, and the partial width if so.
fn parse_tile_tail(segs: &[&str]) -> Result<(u64, bool, Option<u8>), RouteError> {
    if segs.is_empty() {
        return Err(RouteError::NoMatch);
    }

    // A partial tile has its last N-segment suffixed with literal ".p", and
    // the following segment is the width -- i.e. `segs` ends in
    // `["xNNN.p", "W"]`. A full tile has no such segment.
    let n_part_ends_with_p = segs.len() >= 2 && segs[segs.len() - 2].ends_with(".p");
    if n_part_ends_with_p {
        let width: u8 = segs[segs.len() - 1].parse().map_err(|_| RouteError::NoMatch)?;
        if !(1..=255).contains(&width) {
            return Err(RouteError::NoMatch);
        }
        let mut n_segs: Vec<&str> = segs[..segs.len() - 1].to_vec();
        let last_idx = n_segs.len() - 1;
        n_segs[last_idx] = n_segs[last_idx]
            .strip_suffix(".p")
            .ok_or(RouteError::NoMatch)?;
        let index = decode_groups_of_three(&n_segs)?;
        Ok((index, true, Some(width)))
    } else {
        let index = decode_groups_of_three(segs)?;
        Ok((index, false, None))
    }
}

/// Decodes tlog "groups of three" path segments into a `u64` index.
///
/// Every non-terminal segment must be `x` followed by exactly three decimal
/// digits. The terminal segment must be exactly three decimal digits,
/// optionally prefixed by `x`. The integer is reassembled by treating each
/// group as a base-1000 digit: `value = ((g0 * 1000 + g1) * 1000 + g2) ...`.
fn decode_groups_of_three(segs: &[&str]) -> Result<u64, RouteError> {
    if segs.is_empty() {
        return Err(RouteError::NoMatch);
    }

    let mut value: u64 = 0;
    let last = segs.len() - 1;
    for (i, seg) in segs.iter().enumerate() {
        let digits = if i == last {
            seg.strip_prefix('x').unwrap_or(seg)
        } else {
            seg.strip_prefix('x').ok_or(RouteError::InvalidCoordinate)?
        };

        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RouteError::InvalidCoordinate);
        }
        let group: u64 = digits.parse().map_err(|_| RouteError::InvalidCoordinate)?;

        value = value
            .checked_mul(1000)
            .and_then(|v| v.checked_add(group))
            .ok_or(RouteError::IndexOverflow)?;
    }

    Ok(value)
}
