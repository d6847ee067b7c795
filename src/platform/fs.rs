//! Direct-I/O file open, `fallocate`, and positional vectored write.
//!
//! Grounded in the raw-`libc` style used elsewhere in the retrieval pack
//! for the same problem (e.g. `allocate_soft` in `dennisss-dacha`'s
//! `pkg/core/src/fs`): these are thin, `unsafe`-at-the-boundary wrappers
//! around the underlying syscalls, with a non-fatal fallback when the
//! platform or filesystem doesn't support the fast path (§7: "Rotation
//! error").

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Opens `path` for writing, creating it if necessary, with direct-I/O
/// semantics (`O_DIRECT`) where the platform and filesystem support it.
///
/// Many filesystems (notably `tmpfs`, used heavily in tests) reject
/// `O_DIRECT`; in that case we fall back to a plain open rather than
/// fail construction, matching §4.4: "on platforms lacking direct I/O, a
/// plain append is acceptable".
pub fn open_data_file(path: &Path) -> io::Result<File> {
    #[cfg(unix)]
    {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true);
        match opts.clone().custom_flags(libc::O_DIRECT).open(path) {
            Ok(file) => Ok(file),
            Err(_) => opts.open(path),
        }
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().read(true).write(true).create(true).open(path)
    }
}

/// Pre-extends `file` to `len` bytes so that subsequent writes don't
/// trigger filesystem block allocation inline (§4.4). A no-op wherever
/// `fallocate` isn't available; rotation and offset tracking behave
/// identically either way, just without the preallocation benefit.
pub fn preallocate(file: &File, len: u64) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `file` owns a valid fd for the duration of this call.
        let ret = unsafe { libc::fallocate(file.as_raw_fd(), 0, 0, len as libc::off_t) };
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (file, len);
        Ok(())
    }
}

/// Issues a single positional vectored write of `buffers` at `offset`,
/// returning the number of bytes the syscall reported written.
///
/// Empty buffers are skipped before the call, per §4.4.
#[cfg(unix)]
pub fn write_vectored_at(file: &File, buffers: &[&[u8]], offset: u64) -> io::Result<usize> {
    let iovecs: Vec<libc::iovec> = buffers
        .iter()
        .filter(|b| !b.is_empty())
        .map(|b| libc::iovec {
            iov_base: b.as_ptr() as *mut libc::c_void,
            iov_len: b.len(),
        })
        .collect();

    if iovecs.is_empty() {
        return Ok(0);
    }

    // SAFETY: every `iovec` points at a live `&[u8]` borrowed for the
    // duration of this call, and `file`'s fd is valid.
    let ret = unsafe {
        libc::pwritev(
            file.as_raw_fd(),
            iovecs.as_ptr(),
            iovecs.len() as libc::c_int,
            offset as libc::off_t,
        )
    };

    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

#[cfg(not(unix))]
pub fn write_vectored_at(file: &File, buffers: &[&[u8]], offset: u64) -> io::Result<usize> {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = file.try_clone()?;
    file.seek(SeekFrom::Start(offset))?;
    let mut total = 0;
    for buf in buffers.iter().filter(|b| !b.is_empty()) {
        file.write_all(buf)?;
        total += buf.len();
    }
    Ok(total)
}
