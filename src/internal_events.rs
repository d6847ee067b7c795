//! Internal observability events.
//!
//! Modeled on `vector_buffers::internal_events`: each state transition
//! worth surfacing is a small struct with an `emit(self)` method that
//! logs via `tracing` and records `metrics` crate counters/gauges. None
//! of this sits on the hot admission path (§7: "no log line on the hot
//! path") -- `RecordDropped` is only emitted from the non-hot-path
//! permit/timeout branch in `logger.rs`, never from `Shard::write`.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tracing::{debug, error, info, trace, warn};

pub struct ShardSwapped {
    pub logger_id: String,
    pub shard_id: usize,
}

impl ShardSwapped {
    pub fn emit(self) {
        trace!(shard_id = self.shard_id, logger_id = %self.logger_id, "shard buffer swapped");
        counter!("shardlog_swaps_total", "logger_id" => self.logger_id).increment(1);
    }
}

pub struct ShardBothBuffersFull {
    pub logger_id: String,
    pub shard_id: usize,
}

impl ShardBothBuffersFull {
    pub fn emit(self) {
        debug!(
            shard_id = self.shard_id,
            logger_id = %self.logger_id,
            "both shard buffers held data at flush time; flushing as two frames"
        );
        counter!("shardlog_double_full_total", "logger_id" => self.logger_id).increment(1);
    }
}

pub struct RecordDropped {
    pub logger_id: String,
    pub reason: &'static str,
}

impl RecordDropped {
    pub fn emit(self) {
        debug!(logger_id = %self.logger_id, reason = self.reason, "record dropped");
        counter!(
            "shardlog_dropped_total",
            "logger_id" => self.logger_id,
            "reason" => self.reason
        )
        .increment(1);
    }
}

pub struct FlushTimedOut {
    pub logger_id: String,
    pub shard_id: usize,
    pub valid_bytes: usize,
}

impl FlushTimedOut {
    pub fn emit(self) {
        warn!(
            shard_id = self.shard_id,
            logger_id = %self.logger_id,
            valid_bytes = self.valid_bytes,
            "flush proceeded before all in-flight writers finished copying; tail record may be truncated"
        );
        counter!("shardlog_flush_timeouts_total", "logger_id" => self.logger_id).increment(1);
    }
}

pub struct FlushCompleted {
    pub logger_id: String,
    pub shard_count: usize,
    pub bytes: usize,
    pub duration: Duration,
}

impl FlushCompleted {
    pub fn emit(self) {
        trace!(
            logger_id = %self.logger_id,
            shard_count = self.shard_count,
            bytes = self.bytes,
            duration_us = self.duration.as_micros() as u64,
            "flush batch completed"
        );
        counter!("shardlog_flushes_total", "logger_id" => self.logger_id.clone()).increment(1);
        counter!("shardlog_bytes_written_total", "logger_id" => self.logger_id.clone())
            .increment(self.bytes as u64);
        histogram!("shardlog_flush_duration_seconds", "logger_id" => self.logger_id)
            .record(self.duration.as_secs_f64());
    }
}

pub struct FlushFailed {
    pub logger_id: String,
    pub error: String,
}

impl FlushFailed {
    pub fn emit(self) {
        error!(logger_id = %self.logger_id, error = %self.error, "flush write failed");
        counter!("shardlog_flush_errors_total", "logger_id" => self.logger_id).increment(1);
    }
}

pub struct FileRotated {
    pub logger_id: String,
    pub old_path: String,
    pub new_path: String,
}

impl FileRotated {
    pub fn emit(self) {
        info!(
            logger_id = %self.logger_id,
            old_path = %self.old_path,
            new_path = %self.new_path,
            "log file rotated"
        );
        counter!("shardlog_rotations_total", "logger_id" => self.logger_id).increment(1);
    }
}

pub struct RotationFallback {
    pub logger_id: String,
    pub error: String,
}

impl RotationFallback {
    pub fn emit(self) {
        warn!(
            logger_id = %self.logger_id,
            error = %self.error,
            "preallocation or proactive rotation failed; continuing without it"
        );
        counter!("shardlog_rotation_fallbacks_total", "logger_id" => self.logger_id).increment(1);
    }
}

pub struct LoggerClosed {
    pub logger_id: String,
}

impl LoggerClosed {
    pub fn emit(self) {
        info!(logger_id = %self.logger_id, "logger closed");
        gauge!("shardlog_open", "logger_id" => self.logger_id).set(0.0);
    }
}
