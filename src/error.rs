//! Error types for the logger engine.
//!
//! Mirrors the `Snafu`-per-subsystem style used throughout
//! `vector_buffers` (e.g. `variants::disk_v2::common::BuildError`,
//! `variants::disk_v2::ledger::LedgerLoadCreateError`): one enum per
//! fallible surface, with `#[snafu(display(...))]` messages.
//!
//! Per §7, only construction and `close()` return errors to the caller;
//! everything else is folded into statistics or logged.

use std::io;
use std::path::PathBuf;

use snafu::Snafu;

/// Errors returned from [`crate::config::LoggerConfig::build`].
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("`num_shards` must be greater than zero"))]
    InvalidShardCount,

    #[snafu(display(
        "per-shard capacity ({per_shard_bytes} bytes) must be at least 64 KiB; \
         increase `buffer_size` or decrease `num_shards`"
    ))]
    ShardTooSmall { per_shard_bytes: u64 },

    #[snafu(display("`log_path` must name a file, not a directory: {}", path.display()))]
    InvalidLogPath { path: PathBuf },

    #[snafu(display(
        "`preallocate_file_size` ({preallocate}) must not exceed `max_file_size` ({max})"
    ))]
    PreallocateExceedsMaxFileSize { preallocate: u64, max: u64 },

    #[snafu(display("failed to create log directory {}: {source}", path.display()))]
    CreateLogDir { path: PathBuf, source: io::Error },

    #[snafu(display("failed to open initial log file {}: {source}", path.display()))]
    OpenInitialFile { path: PathBuf, source: io::Error },

    #[snafu(display("failed to allocate shard buffers: {source}"))]
    AllocateBuffers { source: io::Error },
}

/// The first error encountered while closing a [`crate::logger::Logger`].
///
/// Per §4.5/§7, close proceeds through every stage (pending-file cleanup,
/// truncate, sync, close) regardless of earlier failures; this captures
/// only the first one seen.
#[derive(Debug, Snafu)]
pub enum CloseError {
    #[snafu(display("failed to flush pending data during close: {source}"))]
    Flush { source: WriteError },

    #[snafu(display("failed to truncate {} during close: {source}", path.display()))]
    Truncate { path: PathBuf, source: io::Error },

    #[snafu(display("failed to sync {} during close: {source}", path.display()))]
    Sync { path: PathBuf, source: io::Error },

    #[snafu(display("failed to close {}: {source}", path.display()))]
    Close { path: PathBuf, source: io::Error },
}

/// Errors from the file writer's positional vectored write and rotation machinery.
///
/// Never escapes the engine on the hot path (§7: "Flush write error"); the
/// flush worker records it in statistics and logs it via
/// [`crate::internal_events::FlushFailed`].
#[derive(Debug, Snafu)]
pub enum WriteError {
    #[snafu(display("positional vectored write to {} failed: {source}", path.display()))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("failed to rotate log file: {source}"))]
    Rotation { source: io::Error },
}
