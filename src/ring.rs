// Shared-memory byte ring carrying command frames
//
// Layout of the shared region: a 32 byte header followed by N ring
// bytes, N a power of two. Cursors are monotonically increasing byte
// counters; the position inside the ring is `cursor % N`. The producer
// is the only writer of `write`, the consumer the only writer of
// `read`, and each side reads the other's cursor with Acquire and
// publishes its own with Release. That pair of cursors is the only
// cross-process synchronization in the crate.
//
// A frame is 1 command byte, a 4 byte little-endian payload length, and
// the payload, always contiguous in the ring. When a frame does not fit
// in the tail before the wrap point, the producer stores a single PAD
// byte at the current position and advances `write` past the tail; the
// consumer skips to the wrap boundary when it sees PAD.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Frame header: 1 command byte + 4 byte little-endian payload length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Internal marker covering skipped tail bytes before a wrap.
pub const CMD_PAD: u8 = 0x00;
/// Payload is a prepared log line.
pub const CMD_LOG_MSG: u8 = 0x01;
/// Empty payload; the consumer must flush and exit.
pub const CMD_CLOSE: u8 = 0x02;

/// Size of the ring header at the start of the shared region.
pub const RING_HEADER_LEN: usize = std::mem::size_of::<RingHeader>();

/// Smallest accepted ring size.
pub const MIN_RING_SIZE: usize = 1024;

/// Stored in the header's reserved word and validated on attach.
pub const RING_MAGIC: u64 = u64::from_le_bytes(*b"SHMLOG1\0");

/// Round a requested ring size up to the next power of two, clamped to
/// [`MIN_RING_SIZE`].
pub fn round_up_ring_size(bytes: usize) -> usize {
    bytes.max(MIN_RING_SIZE).next_power_of_two()
}

#[repr(C)]
pub struct RingHeader {
    write: AtomicU64,
    read: AtomicU64,
    size: AtomicU64,
    reserved: AtomicU64,
}

/// One side of the ring, layered over a raw memory region. Both the
/// producer and the consumer construct one of these over the same
/// region; which methods they may call is a protocol matter, not a type
/// one.
pub struct Ring {
    header: *mut RingHeader,
    data: *mut u8,
    size: usize,
}

// SAFETY: all shared state behind the pointers is atomic or protected
// by the cursor protocol (bytes between read and write belong to the
// consumer, bytes outside to the producer).
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("corrupt frame stream: {0}")]
    Corrupt(&'static str),
}

/// A complete frame at the consumer's read position. The payload slice
/// points into the ring; copy it out before calling [`Ring::consume`].
#[derive(Debug)]
pub struct Frame<'a> {
    pub cmd: u8,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// Total frame length in ring bytes (header + payload).
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}

impl Ring {
    /// Lay a ring over `base`, which must hold `RING_HEADER_LEN + size`
    /// bytes. `reset` zeroes the cursors and stamps the header; the
    /// attaching side passes `false` and validates with
    /// [`Ring::check_layout`].
    ///
    /// # Panics
    /// Panics if `size` is not a power of two.
    ///
    /// # Safety
    /// `base` must be valid, 8-byte aligned, and outlive the `Ring`;
    /// at most one producer and one consumer may operate on the region.
    pub unsafe fn init(base: *mut u8, size: usize, reset: bool) -> Ring {
        assert!(size.is_power_of_two(), "ring size must be a power of 2");
        let header = base as *mut RingHeader;
        let ring = Ring {
            header,
            data: base.add(RING_HEADER_LEN),
            size,
        };
        if reset {
            let hdr = ring.hdr();
            hdr.write.store(0, Ordering::Relaxed);
            hdr.read.store(0, Ordering::Relaxed);
            hdr.size.store(size as u64, Ordering::Relaxed);
            hdr.reserved.store(RING_MAGIC, Ordering::Release);
        }
        ring
    }

    fn hdr(&self) -> &RingHeader {
        unsafe { &*self.header }
    }

    /// Validate the header written by the creating side.
    pub fn check_layout(&self) -> bool {
        let hdr = self.hdr();
        hdr.reserved.load(Ordering::Acquire) == RING_MAGIC
            && hdr.size.load(Ordering::Relaxed) == self.size as u64
    }

    /// Ring size N in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Largest payload a single frame can carry.
    pub fn max_payload(&self) -> usize {
        self.size - FRAME_HEADER_LEN
    }

    /// Both cursors, in (write, read) order. Diagnostic use only.
    pub fn cursors(&self) -> (u64, u64) {
        (
            self.hdr().write.load(Ordering::Relaxed),
            self.hdr().read.load(Ordering::Relaxed),
        )
    }

    /// Producer view: true once the consumer has caught up completely.
    pub fn is_drained(&self) -> bool {
        let write = self.hdr().write.load(Ordering::Relaxed);
        let read = self.hdr().read.load(Ordering::Acquire);
        read == write
    }

    /// Try to place one frame. Returns false when the ring does not
    /// currently have room; the caller owns the backpressure policy.
    ///
    /// The payload must not exceed [`Ring::max_payload`].
    pub fn try_push(&self, cmd: u8, payload: &[u8]) -> bool {
        let frame = FRAME_HEADER_LEN + payload.len();
        debug_assert!(frame <= self.size);

        loop {
            let write = self.hdr().write.load(Ordering::Relaxed);
            let read = self.hdr().read.load(Ordering::Acquire);
            let used = (write - read) as usize;
            let pos = (write % self.size as u64) as usize;
            let tail = self.size - pos;

            if frame <= tail {
                if used + frame > self.size {
                    return false;
                }
                unsafe {
                    let dst = self.data.add(pos);
                    *dst = cmd;
                    let len = (payload.len() as u32).to_le_bytes();
                    ptr::copy_nonoverlapping(len.as_ptr(), dst.add(1), 4);
                    ptr::copy_nonoverlapping(
                        payload.as_ptr(),
                        dst.add(FRAME_HEADER_LEN),
                        payload.len(),
                    );
                }
                self.hdr()
                    .write
                    .store(write + frame as u64, Ordering::Release);
                return true;
            }

            // The frame must start at the wrap boundary. Publish a pad
            // over the tail, then retry from position zero.
            if used + tail > self.size {
                return false;
            }
            unsafe {
                *self.data.add(pos) = CMD_PAD;
            }
            self.hdr()
                .write
                .store(write + tail as u64, Ordering::Release);
        }
    }

    /// Consumer view of the next complete frame, if any. Pads are
    /// skipped internally. Errors are framing corruption and fatal to
    /// the consumer.
    pub fn peek(&self) -> Result<Option<Frame<'_>>, FrameError> {
        loop {
            let read = self.hdr().read.load(Ordering::Relaxed);
            let write = self.hdr().write.load(Ordering::Acquire);
            let avail = (write - read) as usize;
            if avail == 0 {
                return Ok(None);
            }

            let pos = (read % self.size as u64) as usize;
            let tail = self.size - pos;
            let cmd = unsafe { *self.data.add(pos) };

            if cmd == CMD_PAD {
                if avail < tail {
                    return Err(FrameError::Corrupt("pad shorter than ring tail"));
                }
                self.hdr()
                    .read
                    .store(read + tail as u64, Ordering::Release);
                continue;
            }

            if cmd != CMD_LOG_MSG && cmd != CMD_CLOSE {
                return Err(FrameError::UnknownCommand(cmd));
            }
            if avail < FRAME_HEADER_LEN || tail < FRAME_HEADER_LEN {
                return Err(FrameError::Corrupt("truncated frame header"));
            }

            let mut len_bytes = [0u8; 4];
            unsafe {
                ptr::copy_nonoverlapping(self.data.add(pos + 1), len_bytes.as_mut_ptr(), 4);
            }
            let len = u32::from_le_bytes(len_bytes) as usize;

            if FRAME_HEADER_LEN + len > tail {
                return Err(FrameError::Corrupt("frame crosses the wrap boundary"));
            }
            if FRAME_HEADER_LEN + len > avail {
                return Err(FrameError::Corrupt("frame length exceeds published bytes"));
            }

            let payload =
                unsafe { std::slice::from_raw_parts(self.data.add(pos + FRAME_HEADER_LEN), len) };
            return Ok(Some(Frame { cmd, payload }));
        }
    }

    /// Release `frame_len` bytes back to the producer. Call only after
    /// the corresponding [`Ring::peek`] payload has been copied out or
    /// written to its destination.
    pub fn consume(&self, frame_len: usize) {
        let read = self.hdr().read.load(Ordering::Relaxed);
        self.hdr()
            .read
            .store(read + frame_len as u64, Ordering::Release);
    }
}
