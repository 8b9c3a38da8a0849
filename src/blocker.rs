//! A standalone guard that blocks suspending entirely, independent of the
//! notifier and the handshake.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use crate::config::DaemonConfig;
use crate::error::{Result, SuspendError};
use crate::flags::LockFlags;
use crate::linux;

/// Full suspend block over the daemon's disabled-guard file.
///
/// While the shared lock is held the daemon will not suspend at all, no
/// matter what any handshake says. The guard is best-effort: when the
/// daemon is absent and the guard file does not exist, [`block`] quietly
/// holds nothing. Blocking suspend is advisory hardening, and a program
/// that works without it should not fail because of it.
///
/// [`block`]: SuspendBlocker::block
pub struct SuspendBlocker {
    path: PathBuf,
    file: Option<File>,
    blocking: bool,
}

impl SuspendBlocker {
    /// Blocker for the daemon's disabled-guard file. Never fails; the
    /// guard file is opened lazily on first use.
    pub fn new(config: &DaemonConfig) -> SuspendBlocker {
        SuspendBlocker {
            path: config.disabled(),
            file: None,
            blocking: false,
        }
    }

    /// Take the shared lock on the guard file.
    ///
    /// Returns whether the block is in effect afterwards. A missing guard
    /// file or a failed lock leaves the blocker inert rather than failing.
    /// Calling while already blocking is a no-op.
    pub fn block(&mut self) -> bool {
        if !self.blocking {
            if self.file.is_none() {
                self.file = File::open(&self.path).ok();
            }
            if let Some(file) = &self.file {
                self.blocking = linux::flock(file, LockFlags::SHARED.bits()).is_ok();
            }
        }
        self.blocking
    }

    /// Drop the block if held. Idempotent.
    pub fn unblock(&mut self) {
        if self.blocking {
            if let Some(file) = &self.file {
                // an unlock failure leaves nothing to do; closing the
                // descriptor later releases the lock anyway
                let _ = linux::flock(file, LockFlags::UNLOCK.bits());
            }
            self.blocking = false;
        }
    }

    /// Check if the block is currently in effect
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Tell the daemon to abort the suspend attempt this block is holding
    /// up.
    ///
    /// Reading a byte bumps the access time on the guard file, which the
    /// daemon treats as "give up on this cycle" while it waits for the
    /// exclusive lock. Unlike [`block`], a missing guard file is an error
    /// here: an abort request with nobody listening deserves to be heard
    /// about.
    ///
    /// [`block`]: SuspendBlocker::block
    pub fn abort(&mut self) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(
                File::open(&self.path).map_err(|e| SuspendError::lock_file(&self.path, e))?,
            );
        }
        if let Some(file) = &mut self.file {
            read_guard_byte(file)?;
        }
        Ok(())
    }
}

/// One-shot form of [`SuspendBlocker::abort`] for callers that never held
/// a block.
pub fn abort_cycle(config: &DaemonConfig) -> Result<()> {
    let path = config.disabled();
    let mut file = File::open(&path).map_err(|e| SuspendError::lock_file(&path, e))?;
    read_guard_byte(&mut file)
}

fn read_guard_byte(file: &mut File) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        match file.read(&mut byte) {
            Ok(_) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(SuspendError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn probe(path: &std::path::Path, flags: LockFlags) -> io::Result<File> {
        let file = File::open(path)?;
        linux::flock(&file, (flags | LockFlags::NONBLOCK).bits())?;
        Ok(file)
    }

    #[test]
    fn test_block_holds_shared_lock() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("disabled"), b"x").unwrap();
        let config = DaemonConfig::at(dir.path());

        let mut blocker = SuspendBlocker::new(&config);
        assert!(blocker.block());
        assert!(blocker.is_blocking());

        // shared with other shared holders, exclusive against the daemon
        probe(&config.disabled(), LockFlags::SHARED).unwrap();
        let err = probe(&config.disabled(), LockFlags::EXCLUSIVE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_unblock_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("disabled"), b"x").unwrap();
        let config = DaemonConfig::at(dir.path());

        let mut blocker = SuspendBlocker::new(&config);
        blocker.block();
        blocker.unblock();
        assert!(!blocker.is_blocking());
        probe(&config.disabled(), LockFlags::EXCLUSIVE).unwrap();

        blocker.unblock();
        assert!(!blocker.is_blocking());
    }

    #[test]
    fn test_repeated_block_needs_single_unblock() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("disabled"), b"x").unwrap();
        let config = DaemonConfig::at(dir.path());

        let mut blocker = SuspendBlocker::new(&config);
        assert!(blocker.block());
        assert!(blocker.block());
        blocker.unblock();
        probe(&config.disabled(), LockFlags::EXCLUSIVE).unwrap();
    }

    #[test]
    fn test_block_without_daemon_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::at(dir.path());

        let mut blocker = SuspendBlocker::new(&config);
        assert!(!blocker.block());
        assert!(!blocker.is_blocking());
        blocker.unblock();
    }

    #[test]
    fn test_abort_reads_guard_byte() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("disabled"), b"ab").unwrap();
        let config = DaemonConfig::at(dir.path());

        let mut blocker = SuspendBlocker::new(&config);
        blocker.block();
        blocker.abort().unwrap();
        abort_cycle(&config).unwrap();
    }

    #[test]
    fn test_abort_without_daemon_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::at(dir.path());

        let mut blocker = SuspendBlocker::new(&config);
        assert!(matches!(
            blocker.abort(),
            Err(SuspendError::LockFile { .. })
        ));
        assert!(matches!(
            abort_cycle(&config),
            Err(SuspendError::LockFile { .. })
        ));
    }

    #[test]
    fn test_dropping_blocker_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("disabled"), b"x").unwrap();
        let config = DaemonConfig::at(dir.path());

        let mut blocker = SuspendBlocker::new(&config);
        blocker.block();
        drop(blocker);
        probe(&config.disabled(), LockFlags::EXCLUSIVE).unwrap();
    }
}
