// Writer process main loop
//
// The writer is the consumer side of the ring: it attaches the shared
// region created by its parent, drains frames into a small staging
// buffer, and flushes that buffer to the log file or stdout. It runs
// Starting -> Running -> Draining -> Exited; Draining is entered on a
// Close frame or when the parent disappears, and no ring reads happen
// after the draining flush.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::logfile::{LogFile, WriteError};
use crate::ring::{Ring, CMD_CLOSE, CMD_LOG_MSG};
use crate::shm::{self, SharedRegion};

/// Size of the staging buffer coalescing small frames into one file
/// write. Too large wastes memory bandwidth, too small costs a kernel
/// call per message; payloads larger than this bypass staging entirely.
pub const WRITE_BUF_SIZE: usize = 1024;

/// Ceiling for the idle sleep backoff.
const MAX_SLEEP_MS: u64 = 256;

const ATTACH_RETRIES: u32 = 100;

pub enum Target {
    File {
        path: PathBuf,
        max_file_size: u64,
        max_archives: u32,
    },
    Stdout,
}

pub struct WriterConfig {
    pub parent_pid: u32,
    pub shm_name: String,
    pub ring_size: usize,
    pub target: Target,
}

/// Where log bytes end up. The file sink owns rotation; the stdout sink
/// never rotates.
trait Sink {
    fn write(&mut self, buf: &[u8]) -> Result<(), WriteError>;
    fn flush(&mut self) -> io::Result<()>;
}

impl Sink for LogFile {
    fn write(&mut self, buf: &[u8]) -> Result<(), WriteError> {
        LogFile::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        LogFile::flush(self)
    }
}

struct StdoutSink {
    stdout: io::Stdout,
}

impl StdoutSink {
    fn new() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }
}

impl Sink for StdoutSink {
    fn write(&mut self, buf: &[u8]) -> Result<(), WriteError> {
        self.stdout.write_all(buf).map_err(WriteError::Io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }
}

struct Staging {
    buf: [u8; WRITE_BUF_SIZE],
    len: usize,
}

impl Staging {
    fn new() -> Self {
        Self {
            buf: [0; WRITE_BUF_SIZE],
            len: 0,
        }
    }

    fn free(&self) -> usize {
        WRITE_BUF_SIZE - self.len
    }

    fn append(&mut self, payload: &[u8]) {
        self.buf[self.len..self.len + payload.len()].copy_from_slice(payload);
        self.len += payload.len();
    }

    fn flush(&mut self, sink: &mut dyn Sink) -> Result<(), anyhow::Error> {
        if self.len > 0 {
            let len = self.len;
            self.len = 0;
            sink_write(sink, &self.buf[..len])?;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum DrainOutcome {
    Idle,
    Progress,
    Close,
}

/// Entry point of the shmlog-writer binary.
pub fn run(cfg: WriterConfig) -> Result<()> {
    if !cfg.ring_size.is_power_of_two() {
        bail!("ring size {} is not a power of two", cfg.ring_size);
    }
    let region = attach_region(&cfg)?;
    let ring = unsafe { Ring::init(region.as_mut_ptr(), cfg.ring_size, false) };
    if !ring.check_layout() {
        bail!("shared region {} has an unexpected layout", cfg.shm_name);
    }

    let mut sink: Box<dyn Sink> = match cfg.target {
        Target::File {
            path,
            max_file_size,
            max_archives,
        } => {
            let mut file = LogFile::new(path, max_file_size, max_archives);
            // Open eagerly so the file exists as soon as the logger does.
            file.open().context("failed to open log file")?;
            Box::new(file)
        }
        Target::Stdout => Box::new(StdoutSink::new()),
    };

    let mut staging = Staging::new();
    let mut sleep_ms = 0u64;

    loop {
        let outcome = drain(&ring, &mut staging, sink.as_mut())?;

        match outcome {
            DrainOutcome::Close => break,
            DrainOutcome::Progress => sleep_ms = 0,
            DrainOutcome::Idle => {
                sleep_ms = (sleep_ms.max(1) * 2).min(MAX_SLEEP_MS);
            }
        }

        if !parent_alive(cfg.parent_pid) {
            // Whatever the parent managed to publish before dying is
            // still in the ring; one final drain preserves it. Nobody
            // is left to unlink the region, so that falls to us.
            let _ = drain(&ring, &mut staging, sink.as_mut());
            staging.flush(sink.as_mut())?;
            let _ = sink.flush();
            region.unlink();
            return Ok(());
        }

        if sleep_ms > 0 {
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }
    }

    staging.flush(sink.as_mut())?;
    sink.flush().context("final flush failed")?;
    Ok(())
}

fn attach_region(cfg: &WriterConfig) -> Result<SharedRegion> {
    let len = shm::region_len(cfg.ring_size);
    let mut attempt = 0;
    loop {
        match SharedRegion::attach(&cfg.shm_name, len) {
            Ok(region) => return Ok(region),
            Err(e) => {
                attempt += 1;
                if attempt >= ATTACH_RETRIES {
                    return Err(anyhow!("cannot attach region {}: {}", cfg.shm_name, e));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Consume every complete frame currently in the ring. The staging
/// buffer is flushed whenever it fills and once more at the end of the
/// pass, so a burst costs few kernel calls but nothing lingers while
/// the ring is idle.
fn drain(ring: &Ring, staging: &mut Staging, sink: &mut dyn Sink) -> Result<DrainOutcome> {
    let mut progress = false;

    loop {
        let frame = match ring.peek() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                // Corrupt stream: save what we have, then die loudly.
                let _ = staging.flush(sink);
                let _ = sink.flush();
                return Err(e).context("ring framing error");
            }
        };

        match frame.cmd {
            CMD_CLOSE => {
                let len = frame.frame_len();
                ring.consume(len);
                staging.flush(sink)?;
                return Ok(DrainOutcome::Close);
            }
            CMD_LOG_MSG => {
                progress = true;
                let payload = frame.payload;
                if payload.len() > staging.free() {
                    staging.flush(sink)?;
                }
                if payload.len() <= WRITE_BUF_SIZE {
                    staging.append(payload);
                } else {
                    // Too big to stage: straight from the ring, which
                    // holds the payload contiguously.
                    sink_write(sink, payload)?;
                }
                let len = frame.frame_len();
                ring.consume(len);
            }
            _ => unreachable!("peek validates command bytes"),
        }
    }

    staging.flush(sink)?;
    Ok(if progress {
        DrainOutcome::Progress
    } else {
        DrainOutcome::Idle
    })
}

fn sink_write(sink: &mut dyn Sink, buf: &[u8]) -> Result<()> {
    match sink.write(buf) {
        Ok(()) => Ok(()),
        Err(WriteError::Io(e)) => {
            // Dropped log bytes are preferable to a dead writer.
            eprintln!("shmlog-writer: failed to write to log: {}", e);
            Ok(())
        }
        Err(WriteError::Rotate(e)) => Err(anyhow!(e).context("log rotation failed")),
    }
}

fn parent_alive(parent_pid: u32) -> bool {
    // After the parent dies we are reparented to init or a subreaper,
    // so our ppid no longer matches the pid we were launched with.
    nix::unistd::getppid().as_raw() == parent_pid as i32
}
