// Line prefix construction
//
// A dated line starts with a fixed-width 42 byte prefix:
//
//   2015-07-15T14:53:51.979+0200 [I] 00001fdc <message>
//   [------- 28 bytes ----------]
//   [----------- 42 bytes ------------------]
//
// Building the calendar part of the timestamp is by far the most
// expensive step, so the 28 byte stamp is cached per thread and only
// rebuilt when the wall-clock second changes; the millisecond digits are
// patched on every call.

use std::cell::RefCell;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, LocalResult, TimeZone};

use crate::level::Level;

/// Width of the full line prefix, including the trailing space.
pub const PREFIX_LEN: usize = 42;

const STAMP_LEN: usize = 28;

struct StampCache {
    sec: i64,
    text: [u8; STAMP_LEN],
}

thread_local! {
    static STAMP: RefCell<StampCache> = const {
        RefCell::new(StampCache {
            sec: i64::MIN,
            text: [b'0'; STAMP_LEN],
        })
    };
}

fn rebuild(cache: &mut StampCache, sec: i64) {
    let dt = match Local.timestamp_opt(sec, 0) {
        LocalResult::Single(dt) => dt,
        // Ambiguous or nonexistent local times only occur around DST
        // shifts; either candidate is an acceptable stamp.
        LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => Local::now(),
    };
    let head = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    let zone = dt.format("%z").to_string();
    debug_assert_eq!(head.len(), 19);
    debug_assert_eq!(zone.len(), 5);
    cache.text[..19].copy_from_slice(head.as_bytes());
    cache.text[19] = b'.';
    cache.text[23..].copy_from_slice(zone.as_bytes());
    cache.sec = sec;
}

/// Append the 42 byte prefix for `level` to `out`.
pub fn write_prefix(out: &mut Vec<u8>, level: Level) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let sec = now.as_secs() as i64;
    let millis = now.subsec_millis();

    STAMP.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.sec != sec {
            rebuild(&mut cache, sec);
        }
        cache.text[20] = b'0' + (millis / 100) as u8;
        cache.text[21] = b'0' + (millis / 10 % 10) as u8;
        cache.text[22] = b'0' + (millis % 10) as u8;
        out.extend_from_slice(&cache.text);
    });

    out.extend_from_slice(b" [");
    out.push(level.as_char() as u8);
    out.extend_from_slice(b"] ");
    write_tid_hex(out, current_thread_id());
    out.push(b' ');
}

/// Get current thread ID (truncated to u32)
pub fn current_thread_id() -> u32 {
    #[cfg(target_os = "linux")]
    {
        unsafe { libc::gettid() as u32 }
    }
    #[cfg(not(target_os = "linux"))]
    {
        // No portable numeric thread id; hash the opaque std one.
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish() as u32
    }
}

fn write_tid_hex(out: &mut Vec<u8>, v: u32) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for shift in (0..8).rev() {
        out.push(HEX[((v >> (shift * 4)) & 0xf) as usize]);
    }
}
