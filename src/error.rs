use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for suspend-client operations
pub type Result<T> = std::result::Result<T, SuspendError>;

/// Errors that can occur while watching files or talking to the daemon
#[derive(Error, Debug)]
pub enum SuspendError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A watch directory could not be opened or armed for notification
    #[error("cannot watch directory {}: {source}", path.display())]
    DirectoryOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A daemon lock file could not be opened
    #[error("cannot open lock file {}: {source}", path.display())]
    LockFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A non-blocking lock attempt found the lock contended
    #[error("lock is held elsewhere")]
    WouldBlock,

    /// The daemon's observed state does not match any expected transition
    #[error("suspend protocol out of step: {message}")]
    Protocol { message: String },

    /// No SIGIO wake channel is active for this notifier
    #[error("no signal handler installed; nothing to wait for")]
    NoSignalHandler,
}

impl SuspendError {
    /// Create a new directory-open error
    pub fn directory_open(path: impl AsRef<Path>, source: io::Error) -> Self {
        SuspendError::DirectoryOpen {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a new lock-file error
    pub fn lock_file(path: impl AsRef<Path>, source: io::Error) -> Self {
        SuspendError::LockFile {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a new protocol-desync error
    pub fn protocol(message: impl Into<String>) -> Self {
        SuspendError::Protocol {
            message: message.into(),
        }
    }

    /// Map an I/O error from a lock attempt, folding EWOULDBLOCK into
    /// [`SuspendError::WouldBlock`]
    pub(crate) fn from_lock_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::WouldBlock {
            SuspendError::WouldBlock
        } else {
            SuspendError::Io(err)
        }
    }
}
