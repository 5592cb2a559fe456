//! Runtime configuration: a typed struct with defaults, constructed once
//! at startup from CLI flags with environment variable fallback.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ipnetwork::IpNetwork;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid folder pattern {0:?}: must be `<prefix>*` with a non-empty prefix")]
    InvalidFolderPattern(String),
    #[error("invalid trusted source {0:?}: {1}")]
    InvalidTrustedSource(String, ipnetwork::IpNetworkError),
}

/// Exposes Certificate Transparency log archives over the Static-CT tiled
/// HTTP API.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory containing log folders.
    #[arg(long, env, default_value = "/var/log/ct/archive")]
    pub archive_path: PathBuf,

    /// Pattern matching per-log folders; must be `<prefix>*`.
    #[arg(long, env, default_value = "ct_*")]
    pub folder_pattern: String,

    /// Period between log-list document rebuilds.
    #[arg(long, env, default_value = "10m", value_parser = parse_duration)]
    pub log_list_refresh_interval: Duration,

    /// Period between archive directory rescans.
    #[arg(long, env, default_value = "5m", value_parser = parse_duration)]
    pub archive_refresh_interval: Duration,

    /// Total open-zip budget across all zip-part cache shards. 0 disables
    /// the zip-part cache (every read opens the zip on-demand).
    #[arg(long, env, default_value_t = 2048)]
    pub zip_cache_max_open: usize,

    /// Global semaphore limiting concurrent cold zip opens.
    #[arg(long, env, default_value_t = 64)]
    pub zip_cache_max_concurrent_opens: usize,

    /// Decompressed-bytes budget across all entry-content cache shards.
    /// 0 (or negative) disables the entry-content cache.
    #[arg(long, env, default_value_t = 256 * 1024 * 1024)]
    pub entry_cache_max_bytes: i64,

    /// Cooldown before re-verifying a zip that failed integrity checking.
    #[arg(long, env, default_value = "5m", value_parser = parse_duration)]
    pub zip_integrity_fail_ttl: Duration,

    /// Slow-loris protection: time allowed to receive request headers.
    #[arg(long, env, default_value = "5s", value_parser = parse_duration)]
    pub http_read_header_timeout: Duration,

    /// Keep-alive idle timeout.
    #[arg(long, env, default_value = "60s", value_parser = parse_duration)]
    pub http_idle_timeout: Duration,

    /// Maximum accepted header bytes.
    #[arg(long, env, default_value_t = 8192)]
    pub http_max_header_bytes: usize,

    /// Write timeout, to prevent task accumulation against hung clients.
    #[arg(long, env, default_value = "60s", value_parser = parse_duration)]
    pub http_write_timeout: Duration,

    /// Read timeout. Zero disables it.
    #[arg(long, env, default_value = "0s", value_parser = parse_duration)]
    pub http_read_timeout: Duration,

    /// CSV of IPs/CIDRs whose `X-Forwarded-*` headers are honored.
    #[arg(long, env, default_value = "", value_parser = parse_trusted_sources)]
    pub http_trusted_sources: Vec<IpNetwork>,

    /// Address to listen on.
    #[arg(long, env, default_value = ":8080")]
    pub listen_address: String,

    /// Log 2xx responses too (non-2xx are always logged).
    #[arg(long, env, default_value_t = false)]
    pub verbose: bool,

    /// Enable DEBUG-level logs.
    #[arg(long, env, default_value_t = false)]
    pub debug: bool,

    /// Grace period for in-flight requests during shutdown.
    #[arg(long, env, default_value = "10s", value_parser = parse_duration)]
    pub shutdown_timeout: Duration,
}

impl Cli {
    /// Validates settings that `clap`'s own parsing can't express, and
    /// extracts the bare prefix from `folder_pattern`.
    pub fn folder_prefix(&self) -> Result<String, ConfigError> {
        parse_folder_pattern(&self.folder_pattern)
    }
}

fn parse_folder_pattern(pattern: &str) -> Result<String, ConfigError> {
    pattern
        .strip_suffix('*')
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidFolderPattern(pattern.to_string()))
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_trusted_sources(s: &str) -> Result<Vec<IpNetwork>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            entry
                .parse::<IpNetwork>()
                .map_err(|e| format!("invalid trusted source {entry:?}: {e}"))
        })
        .collect()
}
