//! Aligned vectored append, size-based rotation, and preallocation (§4.4).
//!
//! One [`FileWriter`] owns the currently-open data file for a single
//! [`crate::logger::Logger`]. It is only ever touched from the flush
//! worker task, so `rotation_lock` guards file-handle swaps the way §4.4
//! describes rather than against any real contention here -- it exists
//! so the sequence (check, proactively open, swap) stays one atomic
//! step if a future caller ever drives rotation from more than one task.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use snafu::ResultExt;

use crate::error::{IoSnafu, RotationSnafu, WriteError};
use crate::platform;

/// A completed, rotated-away log file handed off to the caller's upload
/// sink (§4.4: "handoff to upload sink" is out of scope; this crate only
/// produces the notification).
#[derive(Debug, Clone)]
pub struct CompletedFile {
    pub path: PathBuf,
}

/// A file opened ahead of time, at or past 90% fill of the current one,
/// so the eventual rotation swap never blocks on `open` (§4.4).
struct PendingFile {
    path: PathBuf,
    file: std::fs::File,
}

pub struct FileWriter {
    base_path: PathBuf,
    current_path: PathBuf,
    file: std::fs::File,
    /// Logical end of file as far as this writer knows (may be less than
    /// the file's preallocated size on disk).
    written: u64,
    max_file_size: u64,
    preallocate_file_size: Option<u64>,
    next: Option<PendingFile>,
    rotation_lock: Mutex<()>,
}

impl FileWriter {
    /// Opens the initial data file, named with a fresh UTC timestamp
    /// suffix exactly as every later rotation names its file (§6).
    pub fn new(
        base_path: PathBuf,
        max_file_size: u64,
        preallocate_file_size: Option<u64>,
        now: SystemTime,
    ) -> std::io::Result<Self> {
        let pending = Self::open_timestamped(&base_path, preallocate_file_size, now)?;
        Ok(Self {
            base_path,
            current_path: pending.path,
            file: pending.file,
            written: 0,
            max_file_size,
            preallocate_file_size,
            next: None,
            rotation_lock: Mutex::new(()),
        })
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Writes `buffers` at the current logical end of file via a single
    /// positional vectored write (§4.4), advancing `written` by the
    /// number of bytes the syscall reports.
    pub fn write_vectored(&mut self, buffers: &[&[u8]]) -> Result<usize, WriteError> {
        self.write_vectored_timed(buffers).map(|(n, _)| n)
    }

    /// Same as [`Self::write_vectored`], additionally reporting the raw
    /// syscall's own duration separately from the caller's surrounding
    /// bookkeeping, so the flush worker can track both (§4.7: "total
    /// duration and the inner syscall duration").
    pub fn write_vectored_timed(&mut self, buffers: &[&[u8]]) -> Result<(usize, Duration), WriteError> {
        let started = Instant::now();
        let n = platform::write_vectored_at(&self.file, buffers, self.written).context(IoSnafu {
            path: self.current_path.clone(),
        })?;
        let syscall_duration = started.elapsed();
        self.written += n as u64;
        Ok((n, syscall_duration))
    }

    /// True once `max_file_size` (if nonzero) would be reached or
    /// exceeded by writing `additional` more bytes (§4.4: "rotate when
    /// `file_offset` reaches this value").
    pub fn needs_rotation(&self, additional: u64) -> bool {
        self.max_file_size != 0 && self.written + additional >= self.max_file_size
    }

    /// True once writing `additional` more bytes would cross 90% of
    /// `max_file_size`, the point at which the next file should be
    /// opened ahead of the actual rotation (§4.4, §6).
    fn nearing_rotation(&self, additional: u64) -> bool {
        self.max_file_size != 0 && (self.written + additional) * 10 >= self.max_file_size * 9
    }

    /// Opens the next file ahead of time if the current one is nearing
    /// rotation and no next file is pending yet. Best-effort: failure
    /// here is non-fatal (§4.4), since [`Self::rotate`] falls back to
    /// opening the next file synchronously when none was pre-opened.
    pub fn maybe_open_next_proactively(&mut self, now: SystemTime) {
        let _guard = self.rotation_lock.lock();
        if self.next.is_none() && self.nearing_rotation(0) {
            if let Ok(pending) = Self::open_timestamped(&self.base_path, self.preallocate_file_size, now) {
                self.next = Some(pending);
            }
        }
    }

    /// Truncates the file down to its true logical length, syncs it,
    /// and installs the pre-opened (or, failing that, freshly opened)
    /// next file as current. Returns the rotated-away file.
    ///
    /// If preallocation or opening the next file fails, this falls back
    /// to continuing the same file without proactive rotation rather
    /// than losing data (§7: "Rotation error").
    pub fn rotate(&mut self, now: SystemTime) -> Result<CompletedFile, WriteError> {
        let _guard = self.rotation_lock.lock();
        self.rotate_locked(now)
    }

    /// Completes a rotation that was only prepared proactively, if one
    /// is pending. Used at close so a near-full current file is still
    /// handed off even if it never quite reached `max_file_size` (§4.4
    /// "Close protocol").
    pub fn complete_pending_rotation(&mut self, now: SystemTime) -> Option<CompletedFile> {
        let _guard = self.rotation_lock.lock();
        if self.next.is_some() {
            self.rotate_locked(now).ok()
        } else {
            None
        }
    }

    fn rotate_locked(&mut self, now: SystemTime) -> Result<CompletedFile, WriteError> {
        let _ = self.file.set_len(self.written);
        let _ = self.file.sync_data();
        let completed = CompletedFile {
            path: self.current_path.clone(),
        };

        let pending = match self.next.take() {
            Some(pending) => pending,
            None => Self::open_timestamped(&self.base_path, self.preallocate_file_size, now)
                .context(RotationSnafu)?,
        };

        self.file = pending.file;
        self.current_path = pending.path;
        self.written = 0;

        Ok(completed)
    }

    fn open_timestamped(
        base_path: &Path,
        preallocate_file_size: Option<u64>,
        now: SystemTime,
    ) -> std::io::Result<PendingFile> {
        let path = timestamped_file_name(base_path, &platform::format_file_timestamp(now));
        let file = platform::open_data_file(&path)?;
        if let Some(size) = preallocate_file_size {
            let _ = platform::preallocate(&file, size);
        }
        Ok(PendingFile { path, file })
    }

    pub fn sync(&self) -> std::io::Result<()> {
        self.file.sync_data()
    }

    pub fn truncate_to_written(&self) -> std::io::Result<()> {
        self.file.set_len(self.written)
    }
}

/// Builds `{base}_{timestamp}.{ext}` from `base_path`'s stem/extension,
/// e.g. `events.log` -> `events_2024-01-01_00-00-00.log` (§6).
fn timestamped_file_name(base_path: &Path, timestamp: &str) -> PathBuf {
    let parent = base_path.parent().unwrap_or_else(|| Path::new(""));
    let stem = base_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let name = match base_path.extension() {
        Some(ext) => format!("{stem}_{timestamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{timestamp}"),
    };
    parent.join(name)
}
