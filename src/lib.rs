// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Low-latency logging through a shared-memory ring buffer.
//!
//! A [`Logger`] formats a line, places it in a lock-free ring shared
//! with a dedicated writer child process, and returns. The child owns
//! the log file: it drains the ring, coalesces small messages into
//! buffered writes, and performs size-bounded rotation. If the
//! application crashes, the child drains whatever was already published
//! and exits cleanly, so completed log calls are not lost.
//!
//! ```no_run
//! use shmlog::{log_info, log_warn, Logger};
//!
//! let log = Logger::new();
//! log.set_ring_buffer_size(4 << 20);
//! log.set_archive_settings(30 << 20, 3);
//! log.open("/var/log/app.log").expect("open log");
//!
//! log_info!(log, "service started, %v workers", 4);
//! log_warn!(log, "queue depth %v above %v", 1730, 1024);
//!
//! log.close();
//! ```

pub mod error;
pub mod format;
pub mod level;
pub mod logfile;
mod logger;
#[macro_use]
mod macros;
pub mod ring;
pub mod shm;
mod spawn;
pub mod stamp;
pub mod writer;

pub use error::OpenError;
pub use format::FmtArg;
pub use level::Level;
pub use logger::Logger;
pub use spawn::WRITER_BIN;

/// Line terminator appended to formatted messages.
#[cfg(windows)]
pub const EOL: &[u8] = b"\r\n";
/// Line terminator appended to formatted messages.
#[cfg(not(windows))]
pub const EOL: &[u8] = b"\n";
