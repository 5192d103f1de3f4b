// Producer-side logger handle
//
// A `Logger` owns one shared ring and one writer child process. Log
// calls format into a thread-local buffer, place one frame in the ring,
// and return; everything slow (file I/O, rotation) happens in the
// child. A handle may be shared between threads: an internal mutex
// serializes frame submission, which is also what defines cross-thread
// message order.

use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::OpenError;
use crate::format::{self, FmtArg};
use crate::level::Level;
use crate::ring::{self, Ring, CMD_CLOSE, CMD_LOG_MSG};
use crate::shm::{self, SharedRegion};
use crate::spawn;
use crate::stamp::{self, PREFIX_LEN};
use crate::EOL;

const DEFAULT_RING_SIZE: usize = 1 << 20;
const DEFAULT_MAX_ARCHIVES: u32 = 3;
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// How long the first message may wait for the child to drain the ring.
const FIRST_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

// Backpressure shape: spin, then yield, then sleep in 1 ms steps,
// probing the child's health while stalled.
const SPIN_ITERS: u32 = 64;
const YIELD_ITERS: u32 = 256;
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

thread_local! {
    static LINE_BUF: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(256));
}

/// An application logger writing through a shared-memory ring to an
/// out-of-process writer.
///
/// ```no_run
/// use shmlog::{log_info, Logger};
///
/// let log = Logger::new();
/// log.open("/var/log/app.log").expect("open log");
/// log_info!(log, "listening on port %v", 8080);
/// log.close();
/// ```
pub struct Logger {
    /// When set, every log line is also written to this process's
    /// stdout. No effect on a logger opened with
    /// [`Logger::open_stdout`].
    pub tee_stdout: AtomicBool,
    include_date: AtomicBool,
    min_level: AtomicU8,
    inner: Mutex<Inner>,
}

struct Inner {
    ring_size: usize,
    max_file_size: u64,
    max_archives: u32,
    close_timeout: Duration,
    writer_program: Option<PathBuf>,
    prefix_override: Option<[u8; PREFIX_LEN]>,
    channel: Option<Channel>,
    /// The writer died and could not be restarted; discard until the
    /// next close/open cycle.
    dead: bool,
    messages_sent: u64,
    warned_too_large: bool,
    warned_dead: bool,
    warned_not_open: bool,
}

struct Channel {
    // Field order matters: the ring points into the region.
    ring: Ring,
    region: SharedRegion,
    child: Child,
    spawn_cmd: spawn::WriterCommand,
    restarted: bool,
}

impl Logger {
    pub fn new() -> Self {
        Logger {
            tee_stdout: AtomicBool::new(false),
            include_date: AtomicBool::new(true),
            min_level: AtomicU8::new(Level::Debug.as_u8()),
            inner: Mutex::new(Inner {
                ring_size: DEFAULT_RING_SIZE,
                max_file_size: 0,
                max_archives: DEFAULT_MAX_ARCHIVES,
                close_timeout: DEFAULT_CLOSE_TIMEOUT,
                writer_program: None,
                prefix_override: None,
                channel: None,
                dead: false,
                messages_sent: 0,
                warned_too_large: false,
                warned_dead: false,
                warned_not_open: false,
            }),
        }
    }

    /// Set the ring buffer size. Must be called before `open`; the
    /// value is rounded up to the next power of two and clamped to at
    /// least 1 KiB. Ignored (with a stderr note) once open.
    pub fn set_ring_buffer_size(&self, bytes: usize) {
        let mut inner = self.inner.lock().unwrap();
        if inner.channel.is_some() {
            eprintln!("shmlog: set_ring_buffer_size must be called before open");
            return;
        }
        inner.ring_size = ring::round_up_ring_size(bytes);
    }

    pub fn ring_buffer_size(&self) -> usize {
        self.inner.lock().unwrap().ring_size
    }

    /// Configure rotation: rotate when the file would exceed
    /// `max_file_size` bytes, keeping `max_archives` numbered archives.
    /// A size of 0 disables rotation. Must be called before `open`.
    pub fn set_archive_settings(&self, max_file_size: u64, max_archives: u32) {
        let mut inner = self.inner.lock().unwrap();
        if inner.channel.is_some() {
            eprintln!("shmlog: set_archive_settings must be called before open");
            return;
        }
        inner.max_file_size = max_file_size;
        inner.max_archives = max_archives;
    }

    /// How long `close` waits for the writer to exit before killing it.
    /// Clamped to at least 2 seconds.
    pub fn set_close_timeout(&self, timeout: Duration) {
        self.inner.lock().unwrap().close_timeout = timeout.max(MIN_CLOSE_TIMEOUT);
    }

    /// Override the path of the writer helper binary. By default it is
    /// resolved next to the current executable, then via PATH.
    pub fn set_writer_program(&self, path: impl Into<PathBuf>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.channel.is_some() {
            eprintln!("shmlog: set_writer_program must be called before open");
            return;
        }
        inner.writer_program = Some(path.into());
    }

    /// Whether formatted lines carry the 42 byte timestamp prefix.
    pub fn set_include_date(&self, on: bool) {
        self.include_date.store(on, Ordering::Relaxed);
    }

    pub fn include_date(&self) -> bool {
        self.include_date.load(Ordering::Relaxed)
    }

    /// Minimum level; formatted messages below it are dropped before
    /// any formatting work happens.
    pub fn set_level(&self, level: Level) {
        self.min_level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// Set the level from a string; only the first character counts.
    pub fn set_level_str(&self, level: &str) {
        if let Some(level) = Level::parse(level) {
            self.set_level(level);
        }
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.min_level.load(Ordering::Relaxed)).unwrap_or(Level::Debug)
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().channel.is_some()
    }

    /// Path of the current log file, if opened onto one.
    pub fn filename(&self) -> Option<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner
            .channel
            .as_ref()
            .and_then(|channel| channel.spawn_cmd.log_file.clone())
    }

    /// Pin the line prefix to a fixed 42 byte string. Test hook.
    ///
    /// # Panics
    /// Panics if `prefix` is not exactly 42 bytes.
    #[doc(hidden)]
    pub fn set_prefix_override(&self, prefix: &str) {
        assert_eq!(prefix.len(), PREFIX_LEN, "prefix must be 42 bytes");
        let mut fixed = [0u8; PREFIX_LEN];
        fixed.copy_from_slice(prefix.as_bytes());
        self.inner.lock().unwrap().prefix_override = Some(fixed);
    }

    /// Create the shared ring, spawn the writer child, and start
    /// logging into `path`. Fails with [`OpenError::AlreadyOpen`] on a
    /// handle that is already open.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<(), OpenError> {
        self.open_target(Some(path.as_ref().to_path_buf()), false)
    }

    /// Like [`Logger::open`], but the writer sends everything to its
    /// (inherited) stdout and never rotates. Typically used by tests.
    pub fn open_stdout(&self) -> Result<(), OpenError> {
        self.open_target(None, true)
    }

    fn open_target(&self, log_file: Option<PathBuf>, stdout_mode: bool) -> Result<(), OpenError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.channel.is_some() {
            return Err(OpenError::AlreadyOpen);
        }

        let ring_size = inner.ring_size;
        let shm_name = shm::region_name_for(std::process::id());
        let region = SharedRegion::create(&shm_name, shm::region_len(ring_size))?;
        let ring = unsafe { Ring::init(region.as_mut_ptr(), ring_size, true) };

        let spawn_cmd = spawn::WriterCommand {
            program: inner.writer_program.clone(),
            shm_name,
            ring_size,
            log_file,
            max_file_size: if stdout_mode { 0 } else { inner.max_file_size },
            max_archives: inner.max_archives,
            stdout_mode,
        };
        // If the spawn fails the region is dropped right here, which
        // also unlinks its name.
        let child = spawn::spawn_writer(&spawn_cmd)?;

        inner.channel = Some(Channel {
            ring,
            region,
            child,
            spawn_cmd,
            restarted: false,
        });
        inner.dead = false;
        inner.messages_sent = 0;
        inner.warned_too_large = false;
        inner.warned_dead = false;
        inner.warned_not_open = false;
        Ok(())
    }

    /// Flush and shut down the writer. Sends the close frame, waits up
    /// to the close timeout for the child to exit, and kills it on
    /// expiry. The handle may be reopened afterwards.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.channel.is_some() && !inner.dead {
            self.submit(&mut inner, CMD_CLOSE, &[]);
        }
        let timeout = inner.close_timeout;
        let Some(mut channel) = inner.channel.take() else {
            return;
        };
        if !spawn::shutdown_child(&mut channel.child, timeout) {
            eprintln!("shmlog: writer did not exit within {:?}; killed", timeout);
        }
        inner.dead = false;
        inner.messages_sent = 0;
        // Dropping the channel unmaps the region and unlinks its name.
    }

    /// Submit raw bytes as one message, with no prefix and no EOL.
    /// Never fails observably; oversized messages and a dead writer are
    /// diagnosed once on stderr and otherwise dropped.
    pub fn log_raw(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        self.submit(&mut inner, CMD_LOG_MSG, data);
    }

    /// Format and submit one line: `<prefix?><message><EOL>`, where the
    /// prefix is the fixed 42 byte `timestamp [level] tid ` header
    /// unless `include_date` is off.
    pub fn log(&self, level: Level, fmt: &str, args: &[FmtArg]) {
        if level.as_u8() < self.min_level.load(Ordering::Relaxed) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        LINE_BUF.with(|cell| {
            let mut buf = cell.borrow_mut();
            buf.clear();
            if self.include_date.load(Ordering::Relaxed) {
                match &inner.prefix_override {
                    Some(prefix) => buf.extend_from_slice(prefix),
                    None => stamp::write_prefix(&mut buf, level),
                }
            }
            format::format_into(&mut buf, fmt, args);
            buf.extend_from_slice(EOL);
            self.submit(&mut inner, CMD_LOG_MSG, &buf);
        });
    }

    pub fn debug(&self, fmt: &str, args: &[FmtArg]) {
        self.log(Level::Debug, fmt, args);
    }

    pub fn info(&self, fmt: &str, args: &[FmtArg]) {
        self.log(Level::Info, fmt, args);
    }

    pub fn warn(&self, fmt: &str, args: &[FmtArg]) {
        self.log(Level::Warn, fmt, args);
    }

    pub fn error(&self, fmt: &str, args: &[FmtArg]) {
        self.log(Level::Error, fmt, args);
    }

    pub fn fatal(&self, fmt: &str, args: &[FmtArg]) {
        self.log(Level::Fatal, fmt, args);
    }

    fn submit(&self, inner: &mut Inner, cmd: u8, payload: &[u8]) {
        if inner.dead {
            return;
        }
        let Some(channel) = inner.channel.as_mut() else {
            if !inner.warned_not_open {
                inner.warned_not_open = true;
                eprintln!("shmlog: log call on a logger that is not open");
            }
            return;
        };

        if payload.len() > channel.ring.max_payload() {
            if !inner.warned_too_large {
                inner.warned_too_large = true;
                eprintln!(
                    "shmlog: dropped a {} byte message; ring holds at most {}",
                    payload.len(),
                    channel.ring.max_payload()
                );
            }
            return;
        }

        // Backpressure: the only place a log call may stall. While
        // stalled, periodically make sure the consumer still exists.
        let mut spins: u32 = 0;
        let mut last_probe = Instant::now();
        while !channel.ring.try_push(cmd, payload) {
            spins = spins.saturating_add(1);
            if spins < SPIN_ITERS {
                std::hint::spin_loop();
            } else if spins < YIELD_ITERS {
                std::thread::yield_now();
            } else {
                std::thread::sleep(Duration::from_millis(1));
                if last_probe.elapsed() >= PROBE_INTERVAL {
                    last_probe = Instant::now();
                    if !writer_alive(channel) && !restart_writer(channel) {
                        inner.dead = true;
                        if !inner.warned_dead {
                            inner.warned_dead = true;
                            eprintln!("shmlog: writer process is gone; discarding log messages");
                        }
                        return;
                    }
                }
            }
        }

        inner.messages_sent += 1;

        if cmd == CMD_LOG_MSG
            && self.tee_stdout.load(Ordering::Relaxed)
            && !channel.spawn_cmd.stdout_mode
        {
            let _ = std::io::stdout().write_all(payload);
        }

        if inner.messages_sent == 1 {
            // At startup the child may not have attached the region
            // yet. If we crashed now, the region would vanish with us
            // and the message with it. Waiting for the first drain is
            // the last moment that guarantee can still be given.
            if !wait_drained(&channel.ring, FIRST_MESSAGE_TIMEOUT) {
                eprintln!("shmlog: timed out waiting for the writer to consume the first message");
            }
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.close();
    }
}

fn writer_alive(channel: &mut Channel) -> bool {
    match channel.child.try_wait() {
        Ok(Some(_)) => false,
        Ok(None) => true,
        Err(_) => spawn::process_alive(channel.child.id()),
    }
}

/// One restart attempt per open: reattaching the existing region keeps
/// the cursors, so frames published before the crash are recovered.
fn restart_writer(channel: &mut Channel) -> bool {
    if channel.restarted {
        return false;
    }
    channel.restarted = true;
    eprintln!("shmlog: writer process died; restarting it");
    match spawn::spawn_writer(&channel.spawn_cmd) {
        Ok(child) => {
            let _ = channel.child.wait();
            channel.child = child;
            true
        }
        Err(e) => {
            eprintln!("shmlog: failed to restart writer: {}", e);
            false
        }
    }
}

fn wait_drained(ring: &Ring, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !ring.is_drained() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let log = Logger::new();
        assert_eq!(log.ring_buffer_size(), 1 << 20);
        assert_eq!(log.level(), Level::Debug);
        assert!(log.include_date());
        assert!(!log.is_open());
        assert_eq!(log.filename(), None);
    }

    #[test]
    fn test_ring_size_rounds_and_clamps() {
        let log = Logger::new();
        log.set_ring_buffer_size(100);
        assert_eq!(log.ring_buffer_size(), 1024);
        log.set_ring_buffer_size(5000);
        assert_eq!(log.ring_buffer_size(), 8192);
        log.set_ring_buffer_size(65536);
        assert_eq!(log.ring_buffer_size(), 65536);
    }

    #[test]
    fn test_level_setters() {
        let log = Logger::new();
        log.set_level(Level::Warn);
        assert_eq!(log.level(), Level::Warn);
        log.set_level_str("error");
        assert_eq!(log.level(), Level::Error);
        log.set_level_str("bogus");
        assert_eq!(log.level(), Level::Error);
    }

    #[test]
    fn test_close_timeout_floor() {
        let log = Logger::new();
        log.set_close_timeout(Duration::from_millis(1));
        assert_eq!(
            log.inner.lock().unwrap().close_timeout,
            Duration::from_secs(2)
        );
    }

    #[test]
    #[should_panic(expected = "prefix must be 42 bytes")]
    fn test_prefix_override_length_checked() {
        let log = Logger::new();
        log.set_prefix_override("too short");
    }

    #[test]
    fn test_close_without_open_is_noop() {
        let log = Logger::new();
        log.close();
        log.close();
        assert!(!log.is_open());
    }

    #[test]
    fn test_filtered_levels_skip_submission() {
        // Logging below the minimum level on an unopened logger must
        // not even reach the not-open diagnostic path.
        let log = Logger::new();
        log.set_level(Level::Error);
        log.info("never formatted %v", &[FmtArg::from(1)]);
        assert!(!log.inner.lock().unwrap().warned_not_open);
    }
}
