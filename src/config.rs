//! Logger configuration and validated construction (§6, §10.3).
//!
//! Mirrors the teacher's `DiskBufferConfig`/`DiskBufferConfigBuilder`
//! duality: a plain, `serde`-deserializable struct with defaults for
//! every field, plus a fluent builder for programmatic construction.
//! File-based config loading is explicitly out of scope; only the types
//! live here.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use snafu::ensure;

use crate::error::{
    ConfigError, InvalidLogPathSnafu, InvalidShardCountSnafu, PreallocateExceedsMaxFileSizeSnafu,
    ShardTooSmallSnafu,
};
use crate::logger::Logger;

const MIN_SHARD_BYTES: u64 = 64 * 1024;

fn default_buffer_size() -> u64 {
    64 * 1024 * 1024
}

fn default_num_shards() -> usize {
    8
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_flush_timeout() -> Duration {
    Duration::from_millis(10)
}

fn default_upload_channel_capacity() -> usize {
    1024
}

fn default_flush_channel_capacity(num_shards: usize) -> usize {
    (4 * num_shards).max(1)
}

/// Declarative configuration for a [`Logger`] (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    /// Path of the active data file; rotated files are named alongside it.
    pub log_path: PathBuf,

    /// Per-shard buffer budget, split evenly across `num_shards` (each
    /// shard's buffer capacity is `buffer_size / num_shards`, rounded up
    /// to the allocator's alignment; each shard holds two such buffers).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u64,

    /// Number of independent admission shards (§4.3).
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,

    /// Maximum interval between flush ticks absent shard-count pressure
    /// triggering an earlier flush (§4.5).
    #[serde(default = "default_flush_interval", with = "humantime_duration")]
    pub flush_interval: Duration,

    /// How long the flush worker waits for an in-flight writer to finish
    /// before flushing a possibly-truncated tail (§4.2, §7).
    #[serde(default = "default_flush_timeout", with = "humantime_duration")]
    pub flush_timeout: Duration,

    /// Rotate the data file once it would exceed this many bytes. Zero
    /// disables size-based rotation (§4.4).
    #[serde(default)]
    pub max_file_size: u64,

    /// If set, each new data file is preallocated to this size via
    /// `fallocate` before any writes land (§4.4).
    #[serde(default)]
    pub preallocate_file_size: Option<u64>,

    /// Bound on the handoff channel the caller drains completed files
    /// from (out-of-scope uploader consumes this).
    #[serde(default = "default_upload_channel_capacity")]
    pub upload_channel_capacity: usize,

    /// Bound on the internal shard-ready-to-flush signal channel.
    /// Defaults to `4 * num_shards` if left unset, matching the spread
    /// of simultaneous shard-full signals the threshold policy expects.
    #[serde(default)]
    pub flush_channel_capacity: Option<usize>,

    /// Identifies this logger in metrics and tracing output when a
    /// process hosts more than one (§10.2). Defaults to the log path's
    /// file stem at build time if left `None`.
    #[serde(default)]
    pub logger_id: Option<String>,
}

impl LoggerConfig {
    pub fn builder(log_path: impl Into<PathBuf>) -> LoggerConfigBuilder {
        LoggerConfigBuilder {
            config: Self {
                log_path: log_path.into(),
                buffer_size: default_buffer_size(),
                num_shards: default_num_shards(),
                flush_interval: default_flush_interval(),
                flush_timeout: default_flush_timeout(),
                max_file_size: 0,
                preallocate_file_size: None,
                upload_channel_capacity: default_upload_channel_capacity(),
                flush_channel_capacity: None,
                logger_id: None,
            },
        }
    }

    /// Per-shard buffer capacity in bytes: `buffer_size` split evenly
    /// across `num_shards` shards. Each shard allocates two buffers of
    /// this capacity (the double buffer), so actual resident memory is
    /// twice `buffer_size`.
    fn per_shard_capacity(&self) -> u64 {
        self.buffer_size / self.num_shards as u64
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.num_shards > 0, InvalidShardCountSnafu);
        ensure!(
            self.per_shard_capacity() >= MIN_SHARD_BYTES,
            ShardTooSmallSnafu {
                per_shard_bytes: self.per_shard_capacity(),
            }
        );
        ensure!(
            self.log_path.file_name().is_some(),
            InvalidLogPathSnafu {
                path: self.log_path.clone(),
            }
        );
        if let Some(preallocate) = self.preallocate_file_size {
            ensure!(
                self.max_file_size == 0 || preallocate <= self.max_file_size,
                PreallocateExceedsMaxFileSizeSnafu {
                    preallocate,
                    max: self.max_file_size,
                }
            );
        }
        Ok(())
    }

    fn resolved_logger_id(&self) -> String {
        self.logger_id.clone().unwrap_or_else(|| {
            self.log_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "shardlog".to_string())
        })
    }

    /// Validates this configuration and constructs the [`Logger`] it
    /// describes, creating the log directory and opening the initial
    /// data file as needed.
    pub fn build(self) -> Result<Logger, ConfigError> {
        self.validate()?;
        Logger::from_config(self)
    }

    pub(crate) fn per_shard_capacity_bytes(&self) -> usize {
        self.per_shard_capacity() as usize
    }

    pub(crate) fn logger_id(&self) -> String {
        self.resolved_logger_id()
    }

    pub(crate) fn resolved_flush_channel_capacity(&self) -> usize {
        self.flush_channel_capacity
            .unwrap_or_else(|| default_flush_channel_capacity(self.num_shards))
    }
}

/// Fluent builder over [`LoggerConfig`], mirroring the teacher's
/// `DiskBufferConfigBuilder`.
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    pub fn buffer_size(mut self, bytes: u64) -> Self {
        self.config.buffer_size = bytes;
        self
    }

    pub fn num_shards(mut self, n: usize) -> Self {
        self.config.num_shards = n;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.config.flush_timeout = timeout;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn preallocate_file_size(mut self, bytes: u64) -> Self {
        self.config.preallocate_file_size = Some(bytes);
        self
    }

    pub fn upload_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.upload_channel_capacity = capacity;
        self
    }

    pub fn flush_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.flush_channel_capacity = Some(capacity);
        self
    }

    pub fn logger_id(mut self, id: impl Into<String>) -> Self {
        self.config.logger_id = Some(id.into());
        self
    }

    pub fn build(self) -> Result<Logger, ConfigError> {
        self.config.build()
    }

    pub fn into_config(self) -> LoggerConfig {
        self.config
    }
}

/// `serde(with = ...)` shim so [`Duration`] fields can deserialize from
/// a plain number of milliseconds without pulling in a humantime crate
/// the teacher doesn't carry either.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
