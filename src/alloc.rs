//! Page-aligned buffer allocator (§4.1).
//!
//! Every buffer used by a shard must be both address- and size-aligned to
//! the filesystem block size (4096 bytes), so that it can be handed
//! directly to a positional vectored write against a file opened with
//! direct-I/O semantics. An anonymous private memory mapping satisfies
//! this on Linux (and other POSIX platforms) directly: `mmap` always
//! returns a page-aligned address, and pages are zero-filled on first
//! touch.

use std::io;
use std::slice;

use memmap2::MmapMut;

use crate::format::{align_up, ALIGNMENT};

/// A page-aligned, zero-initialized region of memory.
///
/// Owns the backing mapping for its entire lifetime. Exposes a raw
/// pointer rather than `&mut [u8]` because [`crate::shard::Shard`] hands
/// out disjoint sub-ranges of this region to concurrent writers under a
/// CAS-reserved offset protocol; see `shard.rs` for why that's sound.
pub struct AlignedBuffer {
    // Kept alive for the lifetime of `ptr`; never read through directly
    // once shared across threads.
    mmap: MmapMut,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: access to the mapped region is coordinated by `Shard` via
// atomics (reserved offsets, in-flight counters, and a flush mutex), not
// by Rust's aliasing rules. No two callers are ever given overlapping
// byte ranges to write concurrently.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates a region of at least `len` bytes, rounded up to the next
    /// multiple of [`ALIGNMENT`], zero-initialized.
    pub fn new(len: usize) -> io::Result<Self> {
        let aligned_len = align_up(len).max(ALIGNMENT);
        let mut mmap = MmapMut::map_anon(aligned_len)?;
        debug_assert_eq!(mmap.as_ptr() as usize % ALIGNMENT, 0);
        let ptr = mmap.as_mut_ptr();
        Ok(Self {
            mmap,
            ptr,
            len: aligned_len,
        })
    }

    /// The aligned length of this region, in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Copies `data` into `self[offset..offset + data.len()]`.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive, non-aliased ownership of
    /// `[offset, offset + data.len())` for the duration of the call (this
    /// is what `Shard`'s CAS-reserved offset protocol guarantees).
    pub unsafe fn write_at(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.len);
        let dst = self.ptr.add(offset);
        std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
    }

    /// Writes a little-endian `u32` at `offset`. Same safety contract as [`Self::write_at`].
    pub unsafe fn write_u32_at(&self, offset: usize, value: u32) {
        self.write_at(offset, &value.to_le_bytes());
    }

    /// Views the whole region as a byte slice.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no concurrent writer holds a reservation
    /// into this region (i.e. the shard's in-flight counter for this
    /// buffer is zero, or the caller only reads the already-reserved
    /// prefix).
    pub unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.ptr, self.len)
    }
}
