//! Lock-free statistics counters and derived metrics (§3, §4.7).
//!
//! Counters are plain atomic adds on the hot path; maxima use a
//! compare-exchange loop (the same pattern `vector_buffers` uses for its
//! buffer-usage gauges in `internal_events.rs`). Averages and
//! percentages are computed only on snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::cast_utils::u64_to_f64_safe;

/// Monotonic counters and running totals/maxima, owned by one [`crate::logger::Logger`].
#[derive(Default)]
pub struct Statistics {
    total: AtomicU64,
    dropped: AtomicU64,
    bytes_written: AtomicU64,
    flushes: AtomicU64,
    flush_errors: AtomicU64,
    blocked_swaps: AtomicU64,
    flush_queue_depth: AtomicU64,

    flush_duration_sum_ns: AtomicU64,
    flush_duration_max_ns: AtomicU64,
    write_duration_sum_ns: AtomicU64,
    write_duration_max_ns: AtomicU64,
    syscall_duration_sum_ns: AtomicU64,
    syscall_duration_max_ns: AtomicU64,
}

fn update_max(cell: &AtomicU64, value: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value > current {
        match cell.compare_exchange_weak(
            current,
            value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

impl Statistics {
    pub fn record_admission(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_blocked_swap(&self) {
        self.blocked_swaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_flush_queue_depth(&self, depth: u64) {
        self.flush_queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn record_write_duration(&self, duration: Duration) {
        let ns = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.write_duration_sum_ns.fetch_add(ns, Ordering::Relaxed);
        update_max(&self.write_duration_max_ns, ns);
    }

    pub fn record_syscall_duration(&self, duration: Duration) {
        let ns = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.syscall_duration_sum_ns.fetch_add(ns, Ordering::Relaxed);
        update_max(&self.syscall_duration_max_ns, ns);
    }

    pub fn record_flush(&self, duration: Duration) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        let ns = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.flush_duration_sum_ns.fetch_add(ns, Ordering::Relaxed);
        update_max(&self.flush_duration_max_ns, ns);
    }

    pub fn record_flush_error(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        let flushes = self.flushes.load(Ordering::Relaxed);

        StatsSnapshot {
            total,
            dropped,
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            flushes,
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
            blocked_swaps: self.blocked_swaps.load(Ordering::Relaxed),
            flush_queue_depth: self.flush_queue_depth.load(Ordering::Relaxed),
            drop_rate: if total == 0 {
                0.0
            } else {
                u64_to_f64_safe(dropped) / u64_to_f64_safe(total)
            },
            avg_flush_duration: avg_duration(self.flush_duration_sum_ns.load(Ordering::Relaxed), flushes),
            max_flush_duration: Duration::from_nanos(self.flush_duration_max_ns.load(Ordering::Relaxed)),
            avg_write_duration: avg_duration(
                self.write_duration_sum_ns.load(Ordering::Relaxed),
                flushes,
            ),
            max_write_duration: Duration::from_nanos(self.write_duration_max_ns.load(Ordering::Relaxed)),
            avg_syscall_duration: avg_duration(
                self.syscall_duration_sum_ns.load(Ordering::Relaxed),
                flushes,
            ),
            max_syscall_duration: Duration::from_nanos(
                self.syscall_duration_max_ns.load(Ordering::Relaxed),
            ),
        }
    }
}

fn avg_duration(sum_ns: u64, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos(sum_ns / count)
    }
}

/// A point-in-time snapshot of [`Statistics`], per §6's `stats_snapshot()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub dropped: u64,
    pub bytes_written: u64,
    pub flushes: u64,
    pub flush_errors: u64,
    pub blocked_swaps: u64,
    pub flush_queue_depth: u64,
    pub drop_rate: f64,
    pub avg_flush_duration: Duration,
    pub max_flush_duration: Duration,
    pub avg_write_duration: Duration,
    pub max_write_duration: Duration,
    pub avg_syscall_duration: Duration,
    pub max_syscall_duration: Duration,
}
