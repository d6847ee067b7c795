//! The per-event logger engine: lock-free admission on arbitrary caller
//! threads, with flushing and rotation driven by background tasks on the
//! ambient Tokio runtime (§4, §4.5).
//!
//! [`Logger::write`] is synchronous and safe to call from any thread,
//! including ones with no Tokio context of their own: the hot path never
//! awaits anything. Construction and [`Logger::close`] do require an
//! active Tokio runtime, since they spawn (and join) the flush worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex as BlockingMutex;
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::LoggerConfig;
use crate::error::{
    AllocateBuffersSnafu, CloseError, ConfigError, CreateLogDirSnafu, FlushSnafu,
    OpenInitialFileSnafu, SyncSnafu, TruncateSnafu, WriteError,
};
use crate::file_writer::{CompletedFile, FileWriter};
use crate::internal_events;
use crate::shard::Shard;
use crate::shard_collection::ShardCollection;
use crate::stats::{Statistics, StatsSnapshot};

type ShutdownHandoff = oneshot::Sender<oneshot::Sender<Result<(), CloseError>>>;

/// Deadline for the admission-retry path's single-slot permit acquisition
/// (§4.5: "deadline D (50 ms)"; §5: "Admission retry permit: 50 ms
/// deadline per producer per failed write"). Fixed, not configurable:
/// unlike `flush_timeout` (which bounds how long the flush worker waits
/// for a buffer to drain), this bounds how long a stalled *producer*
/// waits to retry its own failed write, and the spec gives it its own
/// constant rather than deriving it from flush tuning.
const ADMISSION_RETRY_PERMIT_DEADLINE: Duration = Duration::from_millis(50);

/// A running logger instance: sharded in-memory admission backed by one
/// rotating data file.
///
/// `close` takes `&self` and is idempotent (§8: "double-close is a
/// no-op on the second call"; §4.5: "a `closed` flag makes further
/// admission into drops") rather than consuming `self`, so a shared
/// `Logger` can be closed from wherever holds it without coordinating
/// who owns the last handle.
pub struct Logger {
    id: String,
    shards: Arc<ShardCollection>,
    stats: Arc<Statistics>,
    flush_tx: mpsc::Sender<usize>,
    flush_queue_depth: Arc<AtomicUsize>,
    flush_timeout: Duration,
    closed: AtomicBool,
    upload_rx: BlockingMutex<Option<mpsc::Receiver<CompletedFile>>>,
    shutdown: BlockingMutex<Option<(ShutdownHandoff, JoinHandle<()>)>>,
}

impl Logger {
    pub(crate) fn from_config(config: LoggerConfig) -> Result<Self, ConfigError> {
        if let Some(parent) = config.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context(CreateLogDirSnafu {
                    path: parent.to_path_buf(),
                })?;
            }
        }

        let file_writer = FileWriter::new(
            config.log_path.clone(),
            config.max_file_size,
            config.preallocate_file_size,
            SystemTime::now(),
        )
        .context(OpenInitialFileSnafu {
            path: config.log_path.clone(),
        })?;

        let shards = Arc::new(
            ShardCollection::new(config.num_shards, config.per_shard_capacity_bytes())
                .context(AllocateBuffersSnafu)?,
        );
        let stats = Arc::new(Statistics::default());
        let id = config.logger_id();

        let (flush_tx, flush_rx) = mpsc::channel(config.resolved_flush_channel_capacity());
        let (upload_tx, upload_rx) = mpsc::channel(config.upload_channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let flush_queue_depth = Arc::new(AtomicUsize::new(0));

        let span = tracing::info_span!("shardlog", logger_id = %id);
        let worker = tokio::spawn(
            run_flush_loop(
                id.clone(),
                Arc::clone(&shards),
                Arc::clone(&stats),
                Arc::clone(&flush_queue_depth),
                file_writer,
                flush_rx,
                upload_tx,
                config.flush_interval,
                config.flush_timeout,
                shutdown_rx,
            )
            .instrument(span),
        );

        Ok(Self {
            id,
            shards,
            stats,
            flush_tx,
            flush_queue_depth,
            flush_timeout: config.flush_timeout,
            closed: AtomicBool::new(false),
            upload_rx: BlockingMutex::new(Some(upload_rx)),
            shutdown: BlockingMutex::new(Some((shutdown_tx, worker))),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Admits `payload` as a new record. Returns `false` if the record
    /// was dropped (every shard's admission retry was exhausted) rather
    /// than panicking or blocking indefinitely (§4.2, §7).
    ///
    /// Never awaits; safe to call from any thread. `total` is counted on
    /// every call regardless of outcome, so invariant (1), `total ==
    /// successful + dropped`, holds by construction.
    pub fn write(&self, payload: &[u8]) -> bool {
        self.stats.record_admission();

        if self.closed.load(Ordering::Acquire) {
            self.record_drop("closed");
            return false;
        }

        let (outcome, shard_id) = self.shards.write(payload);
        if outcome.written > 0 {
            self.stats.record_bytes_written(outcome.written as u64);
            if outcome.needs_flush {
                self.enqueue_for_flush(shard_id);
            }
            return true;
        }

        let shard = match self.shards.get(shard_id) {
            Some(shard) => shard,
            None => {
                self.record_drop("invalid_shard");
                return false;
            }
        };

        // §4.5: acquire the shard's single-slot admission permit, retry,
        // force a swap, retry once more, then give up.
        match shard.try_acquire_admission_permit(ADMISSION_RETRY_PERMIT_DEADLINE) {
            Some(_permit) => {
                let retry = shard.write(payload);
                if retry.written > 0 {
                    self.stats.record_bytes_written(retry.written as u64);
                    return true;
                }

                shard.try_swap();
                self.enqueue_for_flush(shard_id);
                internal_events::ShardBothBuffersFull {
                    logger_id: self.id.clone(),
                    shard_id,
                }
                .emit();

                let retry = shard.write(payload);
                if retry.written > 0 {
                    self.stats.record_bytes_written(retry.written as u64);
                    return true;
                }
            }
            None => self.stats.record_blocked_swap(),
        }

        self.record_drop("shard_full");
        false
    }

    fn enqueue_for_flush(&self, shard_id: usize) {
        if self.flush_tx.try_send(shard_id).is_ok() {
            let depth = self.flush_queue_depth.fetch_add(1, Ordering::AcqRel) + 1;
            self.stats.set_flush_queue_depth(depth as u64);
        }
    }

    fn record_drop(&self, reason: &'static str) {
        self.stats.record_drop();
        internal_events::RecordDropped {
            logger_id: self.id.clone(),
            reason,
        }
        .emit();
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Takes ownership of the channel completed (rotated-away) files are
    /// delivered on. Returns `None` if already taken.
    pub fn take_upload_receiver(&self) -> Option<mpsc::Receiver<CompletedFile>> {
        self.upload_rx.lock().take()
    }

    /// Flushes any remaining buffered data, truncates and syncs the
    /// current data file, and joins the background flush task.
    ///
    /// Idempotent: a second call observes `closed` already set and
    /// returns `Ok(())` immediately without touching the file again.
    pub async fn close(&self) -> Result<(), CloseError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let handoff = self.shutdown.lock().take();
        let (shutdown_tx, worker) = match handoff {
            Some(handoff) => handoff,
            None => return Ok(()),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = shutdown_tx.send(reply_tx);
        let result = reply_rx.await.unwrap_or(Ok(()));
        let _ = worker.await;

        internal_events::LoggerClosed {
            logger_id: self.id.clone(),
        }
        .emit();
        result
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_flush_loop(
    logger_id: String,
    shards: Arc<ShardCollection>,
    stats: Arc<Statistics>,
    flush_queue_depth: Arc<AtomicUsize>,
    mut file_writer: FileWriter,
    mut flush_rx: mpsc::Receiver<usize>,
    upload_tx: mpsc::Sender<CompletedFile>,
    flush_interval: Duration,
    flush_timeout: Duration,
    mut shutdown_rx: oneshot::Receiver<oneshot::Sender<Result<(), CloseError>>>,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = flush_ready(&logger_id, &shards, &stats, &mut file_writer, &upload_tx, flush_timeout).await;
            }
            received = flush_rx.recv() => {
                match received {
                    Some(_shard_id) => {
                        let depth = flush_queue_depth.load(Ordering::Acquire).saturating_sub(1);
                        flush_queue_depth.store(depth, Ordering::Release);
                        stats.set_flush_queue_depth(depth as u64);
                        if shards.threshold_reached() {
                            shards.reset_ready();
                            let _ = flush_ready(&logger_id, &shards, &stats, &mut file_writer, &upload_tx, flush_timeout).await;
                        }
                    }
                    None => return,
                }
            }
            reply = &mut shutdown_rx => {
                if let Ok(reply_tx) = reply {
                    let result = finalize_close(&logger_id, &shards, &stats, &mut file_writer, &upload_tx, flush_timeout).await;
                    let _ = reply_tx.send(result);
                }
                return;
            }
        }
    }
}

/// Drains one buffer of `shard` -- whichever one is currently inactive --
/// into a finalized frame, recording a flush-timeout event if not every
/// in-flight writer had finished copying by `flush_timeout`. Returns the
/// index that was drained, so the caller can reset it by that index once
/// the batch has actually been written to disk.
async fn drain_inactive<'a>(
    logger_id: &str,
    shard: &'a Shard,
    flush_timeout: Duration,
) -> (usize, &'a [u8]) {
    let idx = shard.inactive_index();
    let (_, complete) = shard.get_data(flush_timeout).await;
    if !complete {
        internal_events::FlushTimedOut {
            logger_id: logger_id.to_string(),
            shard_id: shard.id(),
            valid_bytes: shard.inactive_offset(),
        }
        .emit();
    }
    shard.finalize_inactive_frame();
    (idx, shard.inactive_slice())
}

/// Swaps and drains every currently-full shard into a single batched
/// vectored write, then rotates the file if it crossed `max_file_size`.
///
/// Per §4.5 `flush_batch`, a shard may need *two* frames in this one
/// pass: if the admission-retry path already force-swapped it before the
/// flush worker got here, the inactive buffer holds the older data and
/// the active buffer may itself have filled since. Draining only ever
/// reads whatever buffer is currently inactive (never blindly swapping
/// first), so the two drains -- if both occur -- land in admission
/// order without the earlier, unconditional per-shard `try_swap` that
/// could otherwise flip a shard the retry path had already swapped back
/// onto its older buffer.
async fn flush_ready(
    logger_id: &str,
    shards: &ShardCollection,
    stats: &Statistics,
    file_writer: &mut FileWriter,
    upload_tx: &mpsc::Sender<CompletedFile>,
    flush_timeout: Duration,
) -> Result<(), WriteError> {
    let ready = shards.ready_shards();
    if ready.is_empty() {
        return Ok(());
    }

    let start = Instant::now();
    let mut slices: Vec<&[u8]> = Vec::with_capacity(ready.len());
    let mut drained: Vec<(&Arc<Shard>, Vec<usize>)> = Vec::with_capacity(ready.len());

    for shard in &ready {
        let mut indices = Vec::with_capacity(2);

        if shard.inactive_has_data() {
            let (idx, slice) = drain_inactive(logger_id, shard, flush_timeout).await;
            indices.push(idx);
            slices.push(slice);
        }

        if shard.active_has_data() {
            // May race with a concurrent admission-retry swap; either
            // way, exactly one swap has happened by the time this
            // returns, so draining "inactive" below is always the
            // buffer this branch detected as full.
            if shard.try_swap() {
                internal_events::ShardSwapped {
                    logger_id: logger_id.to_string(),
                    shard_id: shard.id(),
                }
                .emit();
            }

            let (idx, slice) = drain_inactive(logger_id, shard, flush_timeout).await;
            indices.push(idx);
            slices.push(slice);
        }

        drained.push((shard, indices));
    }

    let write_started = Instant::now();
    let written = match file_writer.write_vectored_timed(&slices) {
        Ok((written, syscall_duration)) => {
            stats.record_write_duration(write_started.elapsed());
            stats.record_syscall_duration(syscall_duration);
            written
        }
        Err(err) => {
            stats.record_flush_error();
            internal_events::FlushFailed {
                logger_id: logger_id.to_string(),
                error: err.to_string(),
            }
            .emit();
            return Err(err);
        }
    };

    // `bytes_written` is counted once, at admission (`Logger::write`), per
    // the resolved ambiguity in the source between counting at admission
    // and again here; double-counting here would break invariant (6).
    stats.record_flush(start.elapsed());
    internal_events::FlushCompleted {
        logger_id: logger_id.to_string(),
        shard_count: ready.len(),
        bytes: written,
        duration: start.elapsed(),
    }
    .emit();

    for (shard, indices) in drained {
        for idx in indices {
            shard.reset_slot(idx).await;
        }
        shard.clear_ready_for_flush();
    }

    file_writer.maybe_open_next_proactively(SystemTime::now());

    if file_writer.needs_rotation(0) {
        let old_path = file_writer.current_path().to_path_buf();
        match file_writer.rotate(SystemTime::now()) {
            Ok(completed) => {
                internal_events::FileRotated {
                    logger_id: logger_id.to_string(),
                    old_path: old_path.display().to_string(),
                    new_path: completed.path.display().to_string(),
                }
                .emit();
                let _ = upload_tx.try_send(completed);
            }
            Err(err) => {
                internal_events::RotationFallback {
                    logger_id: logger_id.to_string(),
                    error: err.to_string(),
                }
                .emit();
            }
        }
    }

    Ok(())
}

/// Flushes every shard's remaining data, completes any pending rotation,
/// and truncates/syncs the final file.
///
/// Per §7 ("Close error"): every stage below runs regardless of an
/// earlier failure; only the *first* error encountered is returned.
async fn finalize_close(
    logger_id: &str,
    shards: &ShardCollection,
    stats: &Statistics,
    file_writer: &mut FileWriter,
    upload_tx: &mpsc::Sender<CompletedFile>,
    flush_timeout: Duration,
) -> Result<(), CloseError> {
    // Mark every shard whose active buffer has data as ready-for-flush
    // and force a swap, so close() never drops buffered records (§4.5
    // "Shutdown").
    for shard in shards.shards() {
        if shard.active_has_data() {
            shard.try_swap();
        }
    }

    let mut first_err: Option<CloseError> = None;

    if let Err(err) = flush_ready(logger_id, shards, stats, file_writer, upload_tx, flush_timeout)
        .await
        .context(FlushSnafu)
    {
        first_err.get_or_insert(err);
    }

    // A file pre-opened proactively but never actually rotated into
    // must still be handed off, so the near-full current file isn't
    // silently left behind (§4.4 "Close protocol").
    if let Some(completed) = file_writer.complete_pending_rotation(SystemTime::now()) {
        internal_events::FileRotated {
            logger_id: logger_id.to_string(),
            old_path: completed.path.display().to_string(),
            new_path: file_writer.current_path().display().to_string(),
        }
        .emit();
        let _ = upload_tx.try_send(completed);
    }

    let path: PathBuf = file_writer.current_path().to_path_buf();

    if let Err(err) = file_writer
        .truncate_to_written()
        .context(TruncateSnafu { path: path.clone() })
    {
        first_err.get_or_insert(err);
    }

    if let Err(err) = file_writer.sync().context(SyncSnafu { path }) {
        first_err.get_or_insert(err);
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The active file is always named with a fresh timestamp (§6), so
    /// tests locate it by scanning the directory rather than assuming
    /// the literal configured `log_path`.
    fn find_log_file(dir: &std::path::Path) -> PathBuf {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| path.extension().map(|ext| ext == "log").unwrap_or(false))
            .expect("expected a timestamped log file in the directory")
    }

    #[tokio::test]
    async fn write_then_close_persists_records() {
        let dir = tempdir::TempDir::new("shardlog-logger-test").unwrap();
        let path = dir.path().join("events.log");

        let logger = LoggerConfig::builder(&path)
            .buffer_size(1024 * 1024)
            .num_shards(2)
            .flush_interval(Duration::from_millis(20))
            .build()
            .unwrap();

        for i in 0..100 {
            assert!(logger.write(format!("record-{i}").as_bytes()));
        }
        let snapshot = logger.stats_snapshot();
        assert_eq!(snapshot.total, 100);
        assert_eq!(snapshot.dropped, 0);

        logger.close().await.unwrap();

        let contents = std::fs::read(find_log_file(dir.path())).unwrap();
        assert!(!contents.is_empty());
    }

    #[tokio::test]
    async fn threshold_triggers_a_batched_flush() {
        let dir = tempdir::TempDir::new("shardlog-logger-test").unwrap();
        let path = dir.path().join("events.log");

        // Small shards force a fill quickly and deterministically.
        let logger = LoggerConfig::builder(&path)
            .buffer_size(4 * 2 * 4096)
            .num_shards(4)
            .flush_interval(Duration::from_secs(3600))
            .build()
            .unwrap();

        let payload = vec![9u8; 4096 - 8 - 4];
        for _ in 0..8 {
            logger.write(&payload);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        logger.close().await.unwrap();

        let contents = std::fs::read(find_log_file(dir.path())).unwrap();
        assert!(!contents.is_empty());
    }
}
