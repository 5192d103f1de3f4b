//! Shared helpers for integration tests.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A unique log path under the system temp dir, so parallel tests never
/// contend for the same file.
pub fn unique_log_path(tag: &str) -> PathBuf {
    env::temp_dir().join(format!(
        "shmlog_{}_{}_{}.log",
        tag,
        std::process::id(),
        Uuid::new_v4().simple()
    ))
}

/// Remove a log file and any numbered archives next to it.
pub fn cleanup_log(path: &Path) {
    let _ = fs::remove_file(path);
    for index in 1..=16 {
        let mut archive = path.as_os_str().to_os_string();
        archive.push(format!(".{}", index));
        let _ = fs::remove_file(PathBuf::from(archive));
    }
}

/// Deterministic test message: `"<seed> "` tokens with an incrementing
/// seed, a newline after every 20th token, a final newline, truncated
/// to exactly `len` bytes.
pub fn make_msg(len: usize, seed: i32) -> String {
    let mut x = String::new();
    let mut seed = seed as i64;
    let mut i: i64 = 0;
    while x.len() < len {
        x.push_str(&format!("{} ", seed));
        seed += 1;
        if (i + seed) % 20 == 0 {
            x.push('\n');
        }
        i += 1;
    }
    x.push('\n');
    x.truncate(len);
    x
}

/// Path of the shmlog-writer binary built alongside the tests
/// (target/debug/deps/<test> -> target/debug/shmlog-writer).
pub fn writer_binary() -> PathBuf {
    let exe = env::current_exe().expect("current_exe");
    exe.parent()
        .and_then(Path::parent)
        .expect("target dir")
        .join(shmlog::WRITER_BIN)
}

/// Assert the file holds exactly `expected`, reporting the first
/// differing byte offset on mismatch.
pub fn assert_log_equals(path: &Path, expected: &[u8]) {
    let actual = fs::read(path).unwrap_or_default();
    if actual == expected {
        return;
    }
    let mismatch = actual
        .iter()
        .zip(expected.iter())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| actual.len().min(expected.len()));
    panic!(
        "log file {} differs from expected: len {} vs {}, first difference at byte {}",
        path.display(),
        actual.len(),
        expected.len(),
        mismatch
    );
}
