//! Tests that drive the shmlog-writer binary directly over a prepared
//! shared region, plus rotation behavior through the full pipeline.

mod common;

use std::fs;
use std::process::{Command, Stdio};

use shmlog::ring::{Ring, CMD_CLOSE, CMD_LOG_MSG};
use shmlog::shm::{self, SharedRegion};
use shmlog::{log_info, Logger};
use uuid::Uuid;

const RING_SIZE: usize = 65536;

struct TestRegion {
    region: SharedRegion,
    ring: Ring,
}

fn prepare_region() -> TestRegion {
    let name = format!(
        "/shmlog-test-{}-{}",
        std::process::id(),
        Uuid::new_v4().simple()
    );
    let region = SharedRegion::create(&name, shm::region_len(RING_SIZE)).expect("create region");
    let ring = unsafe { Ring::init(region.as_mut_ptr(), RING_SIZE, true) };
    TestRegion { region, ring }
}

fn writer_command(region: &SharedRegion, parent_pid: u32) -> Command {
    let mut cmd = Command::new(common::writer_binary());
    cmd.arg("--parent-pid")
        .arg(parent_pid.to_string())
        .arg("--shm-name")
        .arg(region.name())
        .arg("--ring-size")
        .arg(RING_SIZE.to_string())
        .arg("--stdout")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

#[test]
fn test_stdout_writer_emits_frames_verbatim() {
    let tr = prepare_region();
    assert!(tr.ring.try_push(CMD_LOG_MSG, b"straight outta stdout\n"));
    assert!(tr.ring.try_push(CMD_LOG_MSG, b"second line\n"));
    assert!(tr.ring.try_push(CMD_CLOSE, &[]));

    let output = writer_command(&tr.region, std::process::id())
        .spawn()
        .expect("spawn writer")
        .wait_with_output()
        .expect("writer output");

    assert!(output.status.success());
    assert_eq!(output.stdout, b"straight outta stdout\nsecond line\n");
}

#[test]
fn test_writer_drains_ring_after_parent_death() {
    let tr = prepare_region();
    assert!(tr.ring.try_push(CMD_LOG_MSG, b"published before crash\n"));
    assert!(tr.ring.try_push(CMD_LOG_MSG, b"also published\n"));
    // No close frame: the writer must notice the configured parent pid
    // is not its actual parent and drain on its own.

    let output = writer_command(&tr.region, u32::MAX / 2)
        .spawn()
        .expect("spawn writer")
        .wait_with_output()
        .expect("writer output");

    assert!(output.status.success());
    assert_eq!(output.stdout, b"published before crash\nalso published\n");

    // The orphaned writer also unlinks the region name.
    assert!(SharedRegion::attach(tr.region.name(), shm::region_len(RING_SIZE)).is_err());
}

#[test]
fn test_writer_dies_on_corrupt_stream() {
    let tr = prepare_region();
    assert!(tr.ring.try_push(CMD_LOG_MSG, b"good\n"));
    assert!(tr.ring.try_push(0x6e, b"garbage"));

    let output = writer_command(&tr.region, std::process::id())
        .spawn()
        .expect("spawn writer")
        .wait_with_output()
        .expect("writer output");

    assert!(!output.status.success());
    // Everything ahead of the corruption still made it out.
    assert_eq!(output.stdout, b"good\n");
    assert!(!output.stderr.is_empty());
}

#[test]
fn test_writer_requires_a_target() {
    let output = Command::new(common::writer_binary())
        .arg("--parent-pid")
        .arg("1")
        .arg("--shm-name")
        .arg("/shmlog-none")
        .arg("--ring-size")
        .arg("1024")
        .stderr(Stdio::piped())
        .output()
        .expect("run writer");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_open_stdout_smoke() {
    let log = Logger::new();
    log.open_stdout().expect("open stdout");
    assert!(log.is_open());
    assert_eq!(log.filename(), None);
    log_info!(log, "straight outta stdout");
    log.close();
    assert!(!log.is_open());
}

#[test]
fn test_rotation_keeps_recent_archives() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rotating.log");

    let log = Logger::new();
    log.set_include_date(false);
    log.set_archive_settings(256, 3);
    log.open(&path).expect("open");

    let mut expect = String::new();
    for i in 0..600 {
        let line = format!("record number {:04}\n", i);
        log.log_raw(line.as_bytes());
        expect.push_str(&line);
    }
    log.close();

    // Archives .3, .2, .1 and the base file concatenate to a suffix of
    // the submitted stream; .1 is more recent than .2.
    let mut actual = String::new();
    for index in (1..=3).rev() {
        let mut archive = path.as_os_str().to_os_string();
        archive.push(format!(".{}", index));
        actual.push_str(&fs::read_to_string(&archive).unwrap_or_default());
    }
    let base = fs::read_to_string(&path).expect("base log");
    assert!(!base.is_empty());
    actual.push_str(&base);

    assert!(expect.ends_with(&actual), "archive chain out of order");
    assert!(actual.ends_with("record number 0599\n"));
    assert!(actual.len() < expect.len()); // the oldest generations were dropped

    let first_archive = {
        let mut p = path.as_os_str().to_os_string();
        p.push(".1");
        std::path::PathBuf::from(p)
    };
    assert!(first_archive.exists());
}

#[test]
fn test_rotation_disabled_by_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("unbounded.log");

    let log = Logger::new();
    log.set_include_date(false);
    log.open(&path).expect("open");

    for _ in 0..100 {
        log.log_raw(&[b'z'; 512]);
    }
    log.close();

    assert_eq!(fs::metadata(&path).expect("metadata").len(), 100 * 512);
    let mut archive = path.as_os_str().to_os_string();
    archive.push(".1");
    assert!(!std::path::PathBuf::from(archive).exists());
}
