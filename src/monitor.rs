//! The suspend/resume handshake: a two-state machine driven by changes to
//! the daemon's phase files.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::mem;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::rc::{Rc, Weak};

use crate::config::{DaemonConfig, ProtocolVariant, WATCHING, WATCHING_NEXT};
use crate::error::{Result, SuspendError};
use crate::flags::LockFlags;
use crate::linux;
use crate::stat::StatSnapshot;
use crate::watch::{DirWatch, FileEvent, FileHandler, FileWatch, Notifier};

/// Application hooks for the suspend handshake.
///
/// Both methods have defaults, so a handler implements only what it needs;
/// `()` is the always-ready, no-op handler.
pub trait SuspendHandler {
    /// Called when the daemon announces a pending suspend. Return `true`
    /// when ready to let it proceed. Returning `false` means "not ready
    /// yet, and I will call [`SuspendMonitor::release`] myself later"; the
    /// monitor does not ask again and does not retry on its own.
    fn before_suspend(&self) -> bool {
        true
    }

    /// Called exactly once after a suspend/resume cycle completes
    fn after_resume(&self) {}
}

impl SuspendHandler for () {}

/// Handshake states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Holding the shared lock on the current phase file; the daemon
    /// cannot suspend
    Running,
    /// Readiness granted; the daemon may suspend at any point
    Suspended,
}

struct MonitorInner {
    lock: File,
    state: MonitorState,
    watch: FileWatch,
    immediate: Option<File>,
}

struct MonitorShared {
    config: DaemonConfig,
    dir: DirWatch,
    handler: Box<dyn SuspendHandler>,
    weak_self: Weak<MonitorShared>,
    inner: RefCell<MonitorInner>,
}

struct WatchAdapter {
    shared: Weak<MonitorShared>,
}

impl FileHandler for WatchAdapter {
    fn file_changed(&self, _event: &FileEvent<'_>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.recheck();
        }
    }
}

impl MonitorShared {
    fn adapter(&self) -> WatchAdapter {
        WatchAdapter {
            shared: self.weak_self.clone(),
        }
    }

    /// Re-derive the handshake state from the phase files.
    ///
    /// Runs on every change of the watched phase file and once at
    /// construction. Idempotent: a pass that observes nothing new does
    /// nothing, so duplicate notifications are harmless.
    fn recheck(&self) {
        if self.detect_resume() {
            self.handler.after_resume();
        }
        if self.suspend_pending() && self.handler.before_suspend() {
            if let Err(err) = self.release() {
                log::warn!("suspend handshake out of step: {err}");
            }
        }
    }

    /// While suspended, move back to Running once the daemon has completed
    /// the cycle, retargeting the watch at the current phase file. The held
    /// lock descriptor survives the transition: under the rename dialect it
    /// is the file now sitting at the current path.
    fn detect_resume(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.state != MonitorState::Suspended {
            return false;
        }
        if !self.cycle_completed(&inner) {
            return false;
        }
        inner.state = MonitorState::Running;
        inner.watch.cancel();
        inner.watch = self.dir.watch_file(WATCHING, self.adapter());
        log::debug!("cycle complete; watching {}", self.config.watching().display());
        true
    }

    fn cycle_completed(&self, inner: &MonitorInner) -> bool {
        let fresh = StatSnapshot::capture(self.config.watching());
        if !fresh.exists() {
            return false;
        }
        match self.config.variant {
            ProtocolVariant::Rename => match inner.lock.metadata() {
                Ok(meta) => meta.ino() == fresh.ino,
                Err(_) => false,
            },
            ProtocolVariant::Size => fresh.size == 0,
        }
    }

    /// A pending suspend shows up as the held phase file growing past
    /// zero bytes; the daemon truncates it and writes a single byte to
    /// announce.
    fn suspend_pending(&self) -> bool {
        let inner = self.inner.borrow();
        if inner.state != MonitorState::Running {
            return false;
        }
        inner.lock.metadata().map(|m| m.len() > 0).unwrap_or(false)
    }

    /// Move to Suspended: take the shared lock on the next phase file,
    /// switch the watch over, and only then let go of the old lock. The
    /// new lock is held before the old one is released, so at no point is
    /// the client's objection unrepresented.
    fn release(&self) -> Result<()> {
        if self.inner.borrow().state == MonitorState::Suspended {
            return Err(SuspendError::protocol("release while already suspended"));
        }

        let next_path = self.config.watching_next();
        let next = File::open(&next_path).map_err(|e| SuspendError::lock_file(&next_path, e))?;
        linux::flock(&next, LockFlags::SHARED.bits()).map_err(SuspendError::from_lock_io)?;

        let mut inner = self.inner.borrow_mut();
        let old = mem::replace(&mut inner.lock, next);
        inner.state = MonitorState::Suspended;
        inner.watch.cancel();
        inner.watch = self.dir.watch_file(WATCHING_NEXT, self.adapter());
        drop(inner);

        if let Err(err) = linux::flock(&old, LockFlags::UNLOCK.bits()) {
            log::warn!("could not unlock the old phase file: {err}");
        }
        log::debug!("readiness granted; daemon may suspend");
        Ok(())
    }

    fn set_immediate(&self, on: bool) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if on {
            if inner.immediate.is_some() {
                return Ok(());
            }
            let path = self.config.immediate();
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .map_err(|e| SuspendError::lock_file(&path, e))?;
            linux::flock(&file, LockFlags::EXCLUSIVE.bits()).map_err(SuspendError::from_lock_io)?;
            inner.immediate = Some(file);
        } else {
            // dropping the handle closes the file, which releases the lock
            inner.immediate = None;
        }
        Ok(())
    }
}

/// Open and shared-lock the current phase file, looping until the lock is
/// held on a live file. The daemon rotates phase files by rename, so the
/// file can be unlinked between open and lock; link count zero after
/// locking means start over with a fresh open.
fn acquire_current(path: &Path) -> Result<File> {
    loop {
        let file = File::open(path).map_err(|e| SuspendError::lock_file(path, e))?;
        linux::flock(&file, LockFlags::SHARED.bits()).map_err(SuspendError::from_lock_io)?;
        let meta = file.metadata().map_err(|e| SuspendError::lock_file(path, e))?;
        if meta.nlink() > 0 {
            return Ok(file);
        }
    }
}

/// Client side of the daemon's suspend/resume handshake.
///
/// The monitor holds a shared advisory lock on exactly one phase file at a
/// time; the daemon needs the exclusive lock before suspending, so the
/// shared lock reads as "I object to suspending right now". The watch
/// target and the locked file are always the same file, and a two-state
/// machine advances on its changes:
///
/// - an announcement (the held file growing past zero bytes) consults
///   [`SuspendHandler::before_suspend`] and, when ready, releases toward
///   the next phase file;
/// - cycle completion (per [`ProtocolVariant`]) moves back to Running and
///   fires [`SuspendHandler::after_resume`].
///
/// Construction blocks until a live lock file is obtained and never
/// returns a half-initialized monitor.
pub struct SuspendMonitor {
    shared: Rc<MonitorShared>,
}

impl SuspendMonitor {
    /// Attach to the daemon and start in the Running state.
    ///
    /// Registers a watch on the daemon root through `notifier`, takes the
    /// initial shared lock on the current phase file, then probes once so
    /// an announcement that predates the monitor is still honored.
    pub fn new(
        notifier: &Notifier,
        config: DaemonConfig,
        handler: impl SuspendHandler + 'static,
    ) -> Result<SuspendMonitor> {
        let dir = notifier.watch_dir(&config.root)?;
        let lock = acquire_current(&config.watching())?;

        let shared = Rc::new_cyclic(|weak: &Weak<MonitorShared>| {
            let watch = dir.watch_file(
                WATCHING,
                WatchAdapter {
                    shared: weak.clone(),
                },
            );
            MonitorShared {
                config,
                dir: dir.clone(),
                handler: Box::new(handler),
                weak_self: weak.clone(),
                inner: RefCell::new(MonitorInner {
                    lock,
                    state: MonitorState::Running,
                    watch,
                    immediate: None,
                }),
            }
        });
        shared.recheck();
        Ok(SuspendMonitor { shared })
    }

    /// Current handshake state
    pub fn state(&self) -> MonitorState {
        self.shared.inner.borrow().state
    }

    /// Check if the daemon has been cleared to suspend
    pub fn is_suspended(&self) -> bool {
        self.state() == MonitorState::Suspended
    }

    /// The daemon configuration this monitor speaks
    pub fn config(&self) -> &DaemonConfig {
        &self.shared.config
    }

    /// Grant readiness for a pending suspend.
    ///
    /// Called by the application after its [`SuspendHandler::before_suspend`]
    /// returned `false` and the work it was waiting on has finished. Errors
    /// with [`SuspendError::Protocol`] if readiness was already granted.
    pub fn release(&self) -> Result<()> {
        self.shared.release()
    }

    /// Raise (`true`) or drop (`false`) the unconditional suspend block.
    ///
    /// Holding the exclusive lock on the immediate file outweighs the
    /// handshake: the daemon will not suspend while it is held, regardless
    /// of this monitor's state. Idempotent in both directions.
    pub fn set_immediate(&self, on: bool) -> Result<()> {
        self.shared.set_immediate(on)
    }

    /// Check if the unconditional suspend block is held
    pub fn immediate(&self) -> bool {
        self.shared.inner.borrow().immediate.is_some()
    }
}

impl Drop for SuspendMonitor {
    fn drop(&mut self) {
        // stop callbacks first; dropping the files afterwards releases
        // the locks
        self.shared.inner.borrow().watch.cancel();
    }
}
