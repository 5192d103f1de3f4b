// SPDX-License-Identifier: Apache-2.0 OR MIT
// Shared memory region setup
//
// The producer creates a POSIX shared memory object and maps it; the
// writer child attaches to it by name. Names are derived from the
// parent PID plus a per-process nonce so concurrent loggers in one
// process never collide, and a stale object left by a crashed previous
// run with the same PID is unlinked before create.

use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::ring::RING_HEADER_LEN;

const PAGE_SIZE: usize = 4096;

/// Total mapping length for a ring of `ring_size` bytes: header plus
/// ring, rounded up to whole pages. Both sides must compute the same
/// value, so it is a pure function of the ring size.
pub fn region_len(ring_size: usize) -> usize {
    (RING_HEADER_LEN + ring_size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

fn next_nonce() -> u64 {
    static NONCE: OnceLock<AtomicU64> = OnceLock::new();
    NONCE
        .get_or_init(|| {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            AtomicU64::new(nanos ^ ((std::process::id() as u64) << 17))
        })
        .fetch_add(1, Ordering::Relaxed)
}

/// Derive a fresh shared memory object name for this process.
pub fn region_name_for(parent_pid: u32) -> String {
    format!("/shmlog-{}-{:08x}", parent_pid, next_nonce() & 0xffff_ffff)
}

/// An owned mapping of a POSIX shared memory object.
///
/// The creating side owns the name and unlinks it on drop; attaching
/// sides only unmap. [`SharedRegion::unlink`] is also exposed for the
/// writer's parent-death path, where the producer is no longer around
/// to clean up.
pub struct SharedRegion {
    name: String,
    _fd: OwnedFd,
    base: NonNull<libc::c_void>,
    len: usize,
    owner: bool,
}

// SAFETY: the mapping is plain memory; concurrent access is governed by
// the ring protocol layered on top of it.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Create and map a fresh region of `len` bytes (producer side).
    pub fn create(name: &str, len: usize) -> Result<Self, nix::Error> {
        // Remove any stale object from a crashed previous instance.
        let _ = shm_unlink(name);

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        ftruncate(&fd, len as i64)?;
        let base = Self::map(&fd, len)?;

        Ok(Self {
            name: name.to_string(),
            _fd: fd,
            base,
            len,
            owner: true,
        })
    }

    /// Map an existing region by name (writer side).
    pub fn attach(name: &str, len: usize) -> Result<Self, nix::Error> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())?;
        let base = Self::map(&fd, len)?;

        Ok(Self {
            name: name.to_string(),
            _fd: fd,
            base,
            len,
            owner: false,
        })
    }

    fn map(fd: &OwnedFd, len: usize) -> Result<NonNull<libc::c_void>, nix::Error> {
        unsafe {
            mmap(
                None,
                NonZeroUsize::new(len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base.as_ptr() as *mut u8
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove the object name now. Idempotent; the mapping itself stays
    /// valid until drop.
    pub fn unlink(&self) {
        let _ = shm_unlink(self.name.as_str());
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.base, self.len);
        }
        if self.owner {
            let _ = shm_unlink(self.name.as_str());
        }
    }
}
