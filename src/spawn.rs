// SPDX-License-Identifier: Apache-2.0 OR MIT
// Writer child process lifecycle
//
// The writer is a sibling binary resolved next to the current
// executable (one directory up covers cargo's target/debug/deps layout
// for tests), falling back to PATH. All configuration travels as argv
// so the child can be launched, inspected, and reproduced by hand.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use wait_timeout::ChildExt;

/// Name of the writer helper binary.
pub const WRITER_BIN: &str = "shmlog-writer";

/// Everything the writer child needs, in argv form.
#[derive(Debug, Clone)]
pub(crate) struct WriterCommand {
    pub program: Option<PathBuf>,
    pub shm_name: String,
    pub ring_size: usize,
    pub log_file: Option<PathBuf>,
    pub max_file_size: u64,
    pub max_archives: u32,
    pub stdout_mode: bool,
}

pub(crate) fn spawn_writer(cmd: &WriterCommand) -> io::Result<Child> {
    let program = resolve_writer_program(cmd.program.as_deref());

    let mut command = Command::new(program);
    command
        .arg("--parent-pid")
        .arg(std::process::id().to_string())
        .arg("--shm-name")
        .arg(&cmd.shm_name)
        .arg("--ring-size")
        .arg(cmd.ring_size.to_string());

    if let Some(path) = &cmd.log_file {
        command.arg("--log-file").arg(path);
    }
    if cmd.max_file_size > 0 {
        command
            .arg("--max-file-size")
            .arg(cmd.max_file_size.to_string())
            .arg("--max-archives")
            .arg(cmd.max_archives.to_string());
    }
    if cmd.stdout_mode {
        command.arg("--stdout");
    }

    // The child keeps stderr for its own diagnostics; stdout is only
    // shared in stdout mode.
    command
        .stdin(Stdio::null())
        .stdout(if cmd.stdout_mode {
            Stdio::inherit()
        } else {
            Stdio::null()
        })
        .stderr(Stdio::inherit());

    command.spawn()
}

pub(crate) fn resolve_writer_program(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(WRITER_BIN);
            if candidate.is_file() {
                return candidate;
            }
            if let Some(up) = dir.parent() {
                let candidate = up.join(WRITER_BIN);
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
    }
    PathBuf::from(WRITER_BIN)
}

/// Signal-0 probe for a process we did not necessarily spawn.
pub(crate) fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait for the child to exit within `timeout`; force-kill on expiry.
/// Returns true if the child exited on its own.
pub(crate) fn shutdown_child(child: &mut Child, timeout: Duration) -> bool {
    match child.wait_timeout(timeout) {
        Ok(Some(_)) => true,
        _ => {
            let _ = child.kill();
            let _ = child.wait();
            false
        }
    }
}
