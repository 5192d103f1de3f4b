//! Hot-path cost of submitting a log message.
//!
//! The interesting number is the producer-side cost per call: one frame
//! header plus a memcpy into the shared ring. The writer child drains
//! concurrently; rotation keeps the bench from filling the disk.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shmlog::{log_info, Logger};

fn bench_log_raw(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = Logger::new();
    log.set_ring_buffer_size(32 << 20);
    log.set_archive_settings(64 << 20, 1);
    log.open(dir.path().join("bench.log")).expect("open");

    let line = b"a reasonably sized application log line that says something happened at some point\n";
    log.log_raw(line); // first-message handshake out of the way

    c.bench_function("log_raw_83b", |b| {
        b.iter(|| log.log_raw(black_box(line)));
    });

    log.close();
}

fn bench_formatted(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = Logger::new();
    log.set_ring_buffer_size(32 << 20);
    log.set_archive_settings(64 << 20, 1);
    log.open(dir.path().join("bench_fmt.log")).expect("open");
    log.log_raw(b"warmup\n");

    c.bench_function("log_info_formatted", |b| {
        b.iter(|| {
            log_info!(
                log,
                "request %v finished with status %v in %v ms",
                black_box(184467u64),
                black_box(200),
                black_box(3.5)
            )
        });
    });

    log.close();
}

criterion_group!(benches, bench_log_raw, bench_formatted);
criterion_main!(benches);
