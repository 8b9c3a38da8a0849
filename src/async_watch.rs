//! Tokio-flavored wrapper over the change notifier.

use std::io;
use std::path::Path;

use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::{Result, SuspendError};
use crate::flags::NotifyFlags;
use crate::watch::{DirWatch, Notifier};

/// An asynchronous notifier driven by tokio's SIGIO stream.
///
/// The wrapped [`Notifier`] is built without the raw signal handler;
/// tokio owns the process's SIGIO registration instead, and this wrapper
/// turns each delivery into one dispatch pass. Construct it before
/// registering any watch: arming a directory while SIGIO still has its
/// default disposition kills the process on the first change.
///
/// The sync and async sides share the SIGIO registration, so a process
/// uses one or the other, not both.
pub struct AsyncNotifier {
    notifier: Notifier,
    sigio: Signal,
}

impl AsyncNotifier {
    /// Create a notifier whose wake channel is tokio's signal stream
    pub fn new() -> Result<AsyncNotifier> {
        let sigio = signal(SignalKind::io())?;
        Ok(AsyncNotifier {
            notifier: Notifier::without_signal_handler(),
            sigio,
        })
    }

    /// The wrapped synchronous notifier, for registering watches and
    /// building a [`SuspendMonitor`](crate::SuspendMonitor) on top
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Watch a directory with the default content-event mask
    pub fn watch_dir(&self, path: impl AsRef<Path>) -> Result<DirWatch> {
        self.notifier.watch_dir(path)
    }

    /// Watch a directory with an explicit event mask
    pub fn watch_dir_with(&self, path: impl AsRef<Path>, mask: NotifyFlags) -> Result<DirWatch> {
        self.notifier.watch_dir_with(path, mask)
    }

    /// Run one dispatch pass without waiting
    pub fn dispatch(&self) {
        self.notifier.dispatch();
    }

    /// Wait for the next SIGIO delivery, then run one dispatch pass
    pub async fn next_pass(&mut self) -> Result<()> {
        if self.sigio.recv().await.is_none() {
            return Err(SuspendError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "signal stream closed",
            )));
        }
        self.notifier.dispatch();
        Ok(())
    }

    /// Dispatch passes until an error or task cancellation
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.next_pass().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;

    use crate::watch::FileEvent;

    #[tokio::test]
    async fn test_async_notifier_creation() {
        let notifier = AsyncNotifier::new();
        assert!(notifier.is_ok());
    }

    #[tokio::test]
    async fn test_async_watch_and_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = AsyncNotifier::new().unwrap();
        let handle = notifier.watch_dir(dir.path()).unwrap();

        let count = Rc::new(Cell::new(0u32));
        let seen = Rc::clone(&count);
        let _watch = handle.watch_file("a", move |event: &FileEvent<'_>| {
            assert!(event.is_created());
            seen.set(seen.get() + 1);
        });

        fs::write(dir.path().join("a"), b"hello").unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 1);
    }

    #[tokio::test]
    async fn test_async_watch_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = AsyncNotifier::new().unwrap();
        assert!(matches!(
            notifier.watch_dir(dir.path().join("absent")),
            Err(SuspendError::DirectoryOpen { .. })
        ));
    }
}
