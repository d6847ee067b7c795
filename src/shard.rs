//! A single lock-free producer slot and its double buffer (§3, §4.2).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex as BlockingMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::alloc::AlignedBuffer;
use crate::format::{align_up, ALIGNMENT, FRAME_HEADER_LEN, RECORD_HEADER_LEN};

/// Result of a single call to [`Shard::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes actually reserved and copied (0 on failure).
    pub written: usize,
    /// Whether the shard should be handed to the flush worker.
    pub needs_flush: bool,
}

impl WriteOutcome {
    const fn failed() -> Self {
        Self {
            written: 0,
            needs_flush: true,
        }
    }
}

/// One of a shard's two buffers, with its own reservation offset and
/// in-flight writer count (§3: "Each buffer carries an atomic write
/// offset ... and an atomic in-flight counter").
struct BufferSlot {
    buf: AlignedBuffer,
    offset: CachePadded<AtomicU32>,
    in_flight: CachePadded<AtomicUsize>,
}

impl BufferSlot {
    fn new(capacity: usize) -> std::io::Result<Self> {
        Ok(Self {
            buf: AlignedBuffer::new(capacity)?,
            offset: CachePadded::new(AtomicU32::new(FRAME_HEADER_LEN as u32)),
            in_flight: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    fn has_data(&self) -> bool {
        self.offset.load(Ordering::Acquire) as usize > FRAME_HEADER_LEN
    }
}

/// A double-buffered, lock-free record-admission slot.
///
/// Writers reserve a byte range in the *active* buffer with a single CAS
/// on its offset, then copy into that range without holding any lock.
/// The flush worker only ever reads the *inactive* buffer, and only after
/// every writer that reserved space in it has finished copying (§4.2).
pub struct Shard {
    id: usize,
    capacity: usize,
    slots: [BufferSlot; 2],
    active: AtomicUsize,
    swapping: AtomicBool,
    ready_for_flush: AtomicBool,
    /// Single-slot admission permit (§3, §9): serializes a producer's
    /// retry-after-full attempts. A `parking_lot::Mutex` gives us a
    /// synchronous, bounded-wait "counting semaphore with max 1" without
    /// requiring the caller to be inside an async runtime.
    admission_permit: BlockingMutex<()>,
    /// Guards `get_data`/`reset` against the admission-retry path forcing
    /// a swap concurrently with the flush worker inspecting the shard.
    flush_lock: AsyncMutex<()>,
}

impl Shard {
    /// `capacity` is rounded up to [`ALIGNMENT`] here so it always matches
    /// the backing [`AlignedBuffer`]'s actual length -- the frame header
    /// written at flush time stamps this same value, and readers advance
    /// by exactly `capacity` bytes per frame (§4.1, §6).
    pub fn new(id: usize, capacity: usize) -> std::io::Result<Self> {
        let capacity = align_up(capacity).max(ALIGNMENT);
        Ok(Self {
            id,
            capacity,
            slots: [BufferSlot::new(capacity)?, BufferSlot::new(capacity)?],
            active: AtomicUsize::new(0),
            swapping: AtomicBool::new(false),
            ready_for_flush: AtomicBool::new(false),
            admission_permit: BlockingMutex::new(()),
            flush_lock: AsyncMutex::new(()),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Full capacity of a single buffer, in bytes (a multiple of the
    /// alignment, per the allocator in `alloc.rs`).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_data(&self) -> bool {
        self.slots[0].has_data() || self.slots[1].has_data()
    }

    /// True once a write has observed the active buffer full or crossing
    /// the 90% fill threshold (§3).
    pub fn is_full(&self) -> bool {
        self.ready_for_flush.load(Ordering::Acquire)
    }

    /// Reserves space for `payload` in the active buffer and copies it in.
    ///
    /// Lock-free: a single CAS on the active buffer's offset, plus two
    /// atomic adds around the copy (§4.2).
    pub fn write(&self, payload: &[u8]) -> WriteOutcome {
        if payload.is_empty() || payload.len() > u32::MAX as usize {
            return WriteOutcome::failed();
        }
        let record_len = RECORD_HEADER_LEN + payload.len();
        if record_len + FRAME_HEADER_LEN > self.capacity {
            return WriteOutcome::failed();
        }

        loop {
            let active = self.active.load(Ordering::Acquire);
            let slot = &self.slots[active];
            let cur_offset = slot.offset.load(Ordering::Acquire) as usize;
            let new_offset = cur_offset + record_len;

            if new_offset > self.capacity {
                self.ready_for_flush.store(true, Ordering::Release);
                return WriteOutcome::failed();
            }

            match slot.offset.compare_exchange_weak(
                cur_offset as u32,
                new_offset as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    slot.in_flight.fetch_add(1, Ordering::AcqRel);
                    // SAFETY: the CAS above is the only way to obtain a
                    // reservation over `[cur_offset, new_offset)`, and no
                    // other writer can have reserved an overlapping range.
                    unsafe {
                        slot.buf.write_u32_at(cur_offset, payload.len() as u32);
                        slot.buf
                            .write_at(cur_offset + RECORD_HEADER_LEN, payload);
                    }
                    slot.in_flight.fetch_sub(1, Ordering::AcqRel);

                    let crosses_threshold = (new_offset as u64) * 10 >= (self.capacity as u64) * 9;
                    if crosses_threshold {
                        self.ready_for_flush.store(true, Ordering::Release);
                    }
                    return WriteOutcome {
                        written: record_len,
                        needs_flush: crosses_threshold,
                    };
                }
                Err(_) => continue,
            }
        }
    }

    /// Attempts to swap the active and inactive buffers.
    ///
    /// Returns `false` if another swap was already in progress; the
    /// caller should treat that as "someone else is handling it".
    pub fn try_swap(&self) -> bool {
        if self
            .swapping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let current = self.active.load(Ordering::Acquire);
        let other = current ^ 1;
        let _ = self
            .active
            .compare_exchange(current, other, Ordering::AcqRel, Ordering::Acquire);
        self.ready_for_flush.store(true, Ordering::Release);
        self.swapping.store(false, Ordering::Release);
        true
    }

    /// Acquires the shard's single-slot admission permit, blocking the
    /// calling thread for up to `deadline`.
    pub fn try_acquire_admission_permit(
        &self,
        deadline: Duration,
    ) -> Option<parking_lot::MutexGuard<'_, ()>> {
        self.admission_permit.try_lock_for(deadline)
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Index of the buffer the flush worker may currently drain.
    ///
    /// `pub` (rather than `fn`, as it once was) because draining a
    /// both-buffers-full shard spans a `try_swap` in the middle: the
    /// flush worker snapshots this before and after that swap so it can
    /// reset each drained slot by its own index afterward, rather than
    /// by "whichever one is inactive now" (§4.5 `flush_batch`).
    pub fn inactive_index(&self) -> usize {
        self.active_index() ^ 1
    }

    /// Current valid-data offset of the inactive buffer (header reservation
    /// included), used to compute `valid_data_bytes` for its frame.
    pub fn inactive_offset(&self) -> usize {
        self.slots[self.inactive_index()].offset.load(Ordering::Acquire) as usize
    }

    /// True if the buffer at `idx` (0 or 1) holds more than the bare header.
    pub fn slot_has_data(&self, idx: usize) -> bool {
        self.slots[idx].has_data()
    }

    pub fn active_has_data(&self) -> bool {
        self.slot_has_data(self.active_index())
    }

    /// True if the buffer currently inactive holds more than the bare
    /// header, i.e. a prior swap (by the admission retry path or an
    /// earlier step of the same flush pass) already parked data there.
    pub fn inactive_has_data(&self) -> bool {
        self.slot_has_data(self.inactive_index())
    }

    /// Waits for the inactive buffer's in-flight writers to finish, up to
    /// `timeout`, then returns its full-capacity slice and whether every
    /// writer had completed (§4.2).
    pub async fn get_data(&self, timeout: Duration) -> (&[u8], bool) {
        let _guard = self.flush_lock.lock().await;
        let inactive = self.inactive_index();
        let slot = &self.slots[inactive];
        let deadline = Instant::now() + timeout;

        loop {
            if slot.in_flight.load(Ordering::Acquire) == 0 {
                // SAFETY: no in-flight writer holds a reservation into
                // this buffer, and it is the inactive one, so no new
                // writer can acquire one until a future swap.
                return (unsafe { slot.buf.as_slice() }, true);
            }
            if Instant::now() >= deadline {
                return (unsafe { slot.buf.as_slice() }, false);
            }
            tokio::time::sleep(Duration::from_micros(50)).await;
        }
    }

    /// Writes the 8-byte frame header into the buffer at `idx`, in place.
    ///
    /// Called by the flush worker on a buffer it has already drained via
    /// [`Self::get_data`] (so no writer can be concurrently touching it).
    pub fn write_frame_header(&self, idx: usize, valid_data_bytes: u32) {
        unsafe {
            self.slots[idx].buf.write_u32_at(0, self.capacity as u32);
            self.slots[idx].buf.write_u32_at(4, valid_data_bytes);
        }
    }

    /// Writes the frame header into the current inactive buffer, deriving
    /// `valid_data_bytes` from its reserved offset, and returns that value.
    ///
    /// Must only be called after [`Self::get_data`] has established that
    /// no writer holds a reservation into the inactive buffer.
    pub fn finalize_inactive_frame(&self) -> u32 {
        let idx = self.inactive_index();
        let valid = (self.inactive_offset() - FRAME_HEADER_LEN) as u32;
        self.write_frame_header(idx, valid);
        valid
    }

    /// The full aligned buffer backing the current inactive slot, ready
    /// to hand to a vectored write once [`Self::finalize_inactive_frame`]
    /// has stamped its header.
    pub fn inactive_slice(&self) -> &[u8] {
        self.slot_slice(self.inactive_index())
    }

    /// Views buffer `idx` in its entirety. Only safe to call once
    /// `get_data` (or `reset`, which takes the same lock) has established
    /// that no writer holds a reservation into it.
    pub fn slot_slice(&self, idx: usize) -> &[u8] {
        unsafe { self.slots[idx].buf.as_slice() }
    }

    /// Resets buffer `idx` back to the header reservation with no
    /// in-flight writers, without touching `ready_for_flush`.
    ///
    /// A both-buffers-full shard drains two slots in one flush pass
    /// (§4.2, §4.5); each must be reset by its own index, since by the
    /// time the pass finishes "the inactive buffer" no longer names the
    /// first one drained.
    pub async fn reset_slot(&self, idx: usize) {
        let _guard = self.flush_lock.lock().await;
        let slot = &self.slots[idx];
        slot.offset.store(FRAME_HEADER_LEN as u32, Ordering::Release);
        slot.in_flight.store(0, Ordering::Release);
    }

    /// Clears `ready_for_flush`, once every drained slot has been reset.
    pub fn clear_ready_for_flush(&self) {
        self.ready_for_flush.store(false, Ordering::Release);
    }

    /// Resets the current inactive buffer and clears `ready_for_flush`;
    /// the single-frame convenience form of [`Self::reset_slot`] for
    /// callers that only ever drained one buffer.
    pub async fn reset(&self) {
        let idx = self.inactive_index();
        self.reset_slot(idx).await;
        self.clear_ready_for_flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_succeeds_and_reports_no_flush_below_threshold() {
        let shard = Shard::new(0, 4096).unwrap();
        let outcome = shard.write(b"hello");
        assert_eq!(outcome.written, RECORD_HEADER_LEN + 5);
        assert!(!outcome.needs_flush);
        assert!(!shard.is_full());
    }

    #[test]
    fn write_exactly_filling_capacity_succeeds() {
        // capacity - header - record_header bytes of payload fits exactly.
        let capacity = 4096;
        let shard = Shard::new(0, capacity).unwrap();
        let payload_len = capacity - FRAME_HEADER_LEN - RECORD_HEADER_LEN;
        let payload = vec![7u8; payload_len];
        let outcome = shard.write(&payload);
        assert_eq!(outcome.written, RECORD_HEADER_LEN + payload_len);
        assert!(outcome.needs_flush);
        assert!(shard.is_full());
    }

    #[test]
    fn write_exceeding_capacity_fails_and_marks_ready() {
        let capacity = 4096;
        let shard = Shard::new(0, capacity).unwrap();
        let payload = vec![0u8; capacity]; // way over
        let outcome = shard.write(&payload);
        assert_eq!(outcome.written, 0);
        assert!(outcome.needs_flush);
        assert!(shard.is_full());
    }

    #[test]
    fn write_crossing_ninety_percent_marks_ready() {
        let capacity = 4096;
        let shard = Shard::new(0, capacity).unwrap();
        let payload_len = (capacity * 91 / 100) - FRAME_HEADER_LEN - RECORD_HEADER_LEN;
        let payload = vec![1u8; payload_len];
        let outcome = shard.write(&payload);
        assert!(outcome.needs_flush);
        assert!(shard.is_full());
    }

    #[tokio::test]
    async fn swap_and_reset_round_trip() {
        let shard = Shard::new(0, 4096).unwrap();
        shard.write(b"one").unwrap_written();
        assert!(shard.try_swap());
        let (data, complete) = shard.get_data(Duration::from_millis(10)).await;
        assert!(complete);
        assert!(data.len() >= FRAME_HEADER_LEN + 4 + 3);
        shard.reset().await;
        assert!(!shard.slot_has_data(shard.inactive_index()));
    }

    #[tokio::test]
    async fn get_data_reports_incomplete_when_in_flight_does_not_drain() {
        // Simulates a producer whose copy stalls past `flush_timeout`
        // (§7: "Flush timeout on in-flight").
        let shard = Shard::new(0, 4096).unwrap();
        shard.write(b"partial").unwrap_written();
        assert!(shard.try_swap());
        let inactive = shard.inactive_index();
        shard.slots[inactive].in_flight.fetch_add(1, Ordering::AcqRel);

        let (data, complete) = shard.get_data(Duration::from_millis(5)).await;
        assert!(!complete);
        assert!(data.len() >= FRAME_HEADER_LEN);
    }

    trait UnwrapWritten {
        fn unwrap_written(self);
    }
    impl UnwrapWritten for WriteOutcome {
        fn unwrap_written(self) {
            assert!(self.written > 0);
        }
    }
}
