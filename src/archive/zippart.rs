//! The zip-part selection formula. Pure, no I/O: given a
//! route and the part numbers a log actually has on disk, decides which
//! `NNN.zip` holds the requested entry.

use crate::route::Route;

/// Static-CT tile geometry: height 8 (256-wide tiles), so a level-2 tile
/// covers 256^3 leaves, and the archiver shards zips at that boundary.
const LEVEL0_DIVISOR: u64 = 65536;
const LEVEL1_DIVISOR: u64 = 256;

/// Computes which zip part number a route's content lives in. Does not
/// check whether that part actually exists -- callers cross-reference the
/// result against the log's known `zip_parts`.
pub fn select_part(route: &Route) -> u32 {
    match route {
        Route::LogList | Route::Metrics => {
            unreachable!("select_part is only called for per-log routes")
        }
        Route::Checkpoint { .. } | Route::LogInfo { .. } | Route::Issuer { .. } => 0,
        Route::DataTile { index, .. } => (*index / LEVEL0_DIVISOR) as u32,
        Route::HashTile { level, index, .. } => match level {
            0 => (*index / LEVEL0_DIVISOR) as u32,
            1 => (*index / LEVEL1_DIVISOR) as u32,
            2 => *index as u32,
            _ => u32::MAX, // sentinel: level >= 3 uses `select_high_level_part` instead
        },
    }
}

/// For hash tiles at level >= 3, the zip part isn't derived from the index
/// at all: prefer part 0 if present, otherwise the numerically lowest part
/// the log actually has.
pub fn select_high_level_part(zip_parts: &[u32]) -> Option<u32> {
    if zip_parts.contains(&0) {
        Some(0)
    } else {
        zip_parts.iter().min().copied()
    }
}

/// Resolves the final zip part for `route` against the log's known parts,
/// handling the level>=3 special case. Returns `None` if the computed part
/// isn't present (the caller should respond 404).
pub fn resolve(route: &Route, zip_parts: &[u32]) -> Option<u32> {
    let part = match route {
        Route::LogList | Route::Metrics => return None,
        Route::HashTile { level, .. } if *level >= 3 => {
            return select_high_level_part(zip_parts);
        }
        other => select_part(other),
    };

    if zip_parts.contains(&part) {
        Some(part)
    } else {
        None
    }
}
