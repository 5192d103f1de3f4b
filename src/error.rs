// Errors surfaced by the public API
//
// Only `open` and `open_stdout` can fail observably; once a logger is
// open, log calls swallow their failures so logging never propagates
// errors into application logic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpenError {
    /// The handle is already open; close it before reopening.
    #[error("logger is already open")]
    AlreadyOpen,

    /// The shared memory region could not be created or mapped.
    #[error("failed to set up shared memory region: {0}")]
    Shm(#[from] nix::Error),

    /// The writer child process could not be spawned.
    #[error("failed to spawn writer process: {0}")]
    Spawn(#[from] std::io::Error),
}
