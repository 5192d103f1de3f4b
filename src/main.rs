use std::path::PathBuf;

use clap::Parser;
use shmlog::writer::{self, Target, WriterConfig};

/// Writer child process for the shmlog library.
///
/// Normally you do not launch shmlog-writer manually; the logging
/// library spawns it and passes the shared region and file settings on
/// the command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PID of the process that spawned us
    #[arg(long)]
    parent_pid: u32,

    /// Name of the shared memory region holding the ring
    #[arg(long)]
    shm_name: String,

    /// Ring buffer size in bytes (power of two)
    #[arg(long)]
    ring_size: usize,

    /// Log file path (required unless --stdout is given)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Rotate when the file would exceed this many bytes (0 = never)
    #[arg(long, default_value_t = 0)]
    max_file_size: u64,

    /// Number of numbered archive files to keep
    #[arg(long, default_value_t = 3)]
    max_archives: u32,

    /// Write to stdout instead of a file; never rotate
    #[arg(long)]
    stdout: bool,
}

fn main() {
    let args = Args::parse();

    let target = if args.stdout {
        Target::Stdout
    } else {
        match args.log_file {
            Some(path) => Target::File {
                path,
                max_file_size: args.max_file_size,
                max_archives: args.max_archives,
            },
            None => {
                eprintln!("shmlog-writer: either --log-file or --stdout is required");
                std::process::exit(2);
            }
        }
    };

    let cfg = WriterConfig {
        parent_pid: args.parent_pid,
        shm_name: args.shm_name,
        ring_size: args.ring_size,
        target,
    };

    if let Err(e) = writer::run(cfg) {
        eprintln!("shmlog-writer: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_parsing() {
        let args = Args::parse_from([
            "shmlog-writer",
            "--parent-pid",
            "1234",
            "--shm-name",
            "/shmlog-1234-0000abcd",
            "--ring-size",
            "1048576",
            "--log-file",
            "/tmp/app.log",
            "--max-file-size",
            "1000000",
            "--max-archives",
            "5",
        ]);
        assert_eq!(args.parent_pid, 1234);
        assert_eq!(args.ring_size, 1 << 20);
        assert_eq!(args.log_file, Some(PathBuf::from("/tmp/app.log")));
        assert_eq!(args.max_file_size, 1_000_000);
        assert_eq!(args.max_archives, 5);
        assert!(!args.stdout);
    }

    #[test]
    fn test_stdout_mode_needs_no_file() {
        let args = Args::parse_from([
            "shmlog-writer",
            "--parent-pid",
            "1",
            "--shm-name",
            "/r",
            "--ring-size",
            "1024",
            "--stdout",
        ]);
        assert!(args.stdout);
        assert_eq!(args.log_file, None);
        assert_eq!(args.max_file_size, 0);
    }
}
