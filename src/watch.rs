//! The dnotify-backed change notifier: directory watches, per-file watches,
//! and the dispatch loop that re-arms and re-checks on every SIGIO wake.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use libc::c_ulong;

use crate::error::{Result, SuspendError};
use crate::flags::NotifyFlags;
use crate::linux;
use crate::stat::StatSnapshot;

/// Receives change notifications for one watched file.
///
/// Handlers run inside a notifier check pass and must be short and
/// non-blocking; they may register and cancel watches, but must not
/// re-enter [`Notifier::wait`] or [`Notifier::dispatch`]. A pass may run
/// redundantly, so handlers must tolerate duplicate invocations for the
/// same underlying change.
pub trait FileHandler {
    /// Called when the watched file's stat snapshot changes
    fn file_changed(&self, event: &FileEvent<'_>);
}

impl<F> FileHandler for F
where
    F: Fn(&FileEvent<'_>),
{
    fn file_changed(&self, event: &FileEvent<'_>) {
        self(event)
    }
}

/// Receives a callback on every check pass of a watched directory,
/// regardless of which file changed.
pub trait DirHandler {
    /// Called once per check pass; return `false` to deregister
    fn directory_changed(&self) -> bool;
}

impl<F> DirHandler for F
where
    F: Fn() -> bool,
{
    fn directory_changed(&self) -> bool {
        self()
    }
}

/// A change observed on a watched file
#[derive(Debug)]
pub struct FileEvent<'a> {
    /// Path of the watched file
    pub path: &'a Path,
    /// Snapshot stored before this check
    pub previous: StatSnapshot,
    /// Snapshot taken by this check
    pub current: StatSnapshot,
}

impl<'a> FileEvent<'a> {
    /// Check if the file came into existence
    pub fn is_created(&self) -> bool {
        !self.previous.exists() && self.current.exists()
    }

    /// Check if the file stopped existing
    pub fn is_deleted(&self) -> bool {
        self.previous.exists() && !self.current.exists()
    }

    /// Check if a different file now sits at the path
    pub fn is_replaced(&self) -> bool {
        self.previous.exists() && self.current.exists() && self.previous.ino != self.current.ino
    }
}

struct WatchedFile {
    path: PathBuf,
    snapshot: Cell<StatSnapshot>,
    cancelled: Cell<bool>,
    handler: Box<dyn FileHandler>,
}

impl WatchedFile {
    /// Take a fresh snapshot and fire the handler if it differs.
    ///
    /// All three fields take part in the comparison; any one alone can miss
    /// a real change (a rename-over can preserve size and mtime). A
    /// sentinel-to-sentinel "change" compares equal and stays silent.
    fn check(&self) {
        if self.cancelled.get() {
            return;
        }
        let previous = self.snapshot.get();
        let current = StatSnapshot::capture(&self.path);
        if current == previous {
            return;
        }
        self.snapshot.set(current);
        let event = FileEvent {
            path: &self.path,
            previous,
            current,
        };
        self.handler.file_changed(&event);
    }
}

struct DirCallback {
    handler: Box<dyn DirHandler>,
    live: Cell<bool>,
}

struct WatchedDir {
    path: PathBuf,
    dir: File,
    mask: Cell<NotifyFlags>,
    files: RefCell<Vec<Rc<WatchedFile>>>,
    callbacks: RefCell<Vec<Rc<DirCallback>>>,
}

impl WatchedDir {
    fn rearm(&self) -> std::io::Result<()> {
        linux::arm_dnotify(&self.dir, self.mask.get().bits() as c_ulong)
    }

    /// One check pass: directory-wide callbacks first, then every child
    /// file. Iteration goes by index against a re-borrowed list so handlers
    /// are free to register and cancel watches on this very directory;
    /// entries added mid-pass are picked up on the next pass, and
    /// tombstoned entries are purged once the pass is over.
    fn check(&self) {
        let count = self.callbacks.borrow().len();
        for idx in 0..count {
            let cb = {
                let callbacks = self.callbacks.borrow();
                Rc::clone(&callbacks[idx])
            };
            if !cb.live.get() {
                continue;
            }
            if !cb.handler.directory_changed() {
                cb.live.set(false);
            }
        }
        self.callbacks.borrow_mut().retain(|cb| cb.live.get());

        let count = self.files.borrow().len();
        for idx in 0..count {
            let watch = {
                let files = self.files.borrow();
                Rc::clone(&files[idx])
            };
            watch.check();
        }
        self.files.borrow_mut().retain(|w| !w.cancelled.get());
    }
}

/// Handle to one watched directory; cheap to clone.
#[derive(Clone)]
pub struct DirWatch {
    state: Rc<WatchedDir>,
}

impl DirWatch {
    /// Path of the watched directory
    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Watch one file inside this directory.
    ///
    /// The name is resolved relative to the directory. The initial snapshot
    /// is taken here; a missing file primes the sentinel snapshot rather
    /// than failing, so creation is observed as the first change.
    pub fn watch_file(
        &self,
        name: impl AsRef<Path>,
        handler: impl FileHandler + 'static,
    ) -> FileWatch {
        let path = self.state.path.join(name);
        let snapshot = StatSnapshot::capture(&path);
        let state = Rc::new(WatchedFile {
            path,
            snapshot: Cell::new(snapshot),
            cancelled: Cell::new(false),
            handler: Box::new(handler),
        });
        self.state.files.borrow_mut().push(Rc::clone(&state));
        FileWatch { state }
    }

    /// Register a directory-wide handler, invoked on every check pass until
    /// it returns `false`.
    pub fn watch_all(&self, handler: impl DirHandler + 'static) {
        self.state.callbacks.borrow_mut().push(Rc::new(DirCallback {
            handler: Box::new(handler),
            live: Cell::new(true),
        }));
    }
}

impl AsRawFd for DirWatch {
    fn as_raw_fd(&self) -> RawFd {
        self.state.dir.as_raw_fd()
    }
}

/// Cancellable handle to one watched file; cheap to clone.
#[derive(Clone)]
pub struct FileWatch {
    state: Rc<WatchedFile>,
}

impl FileWatch {
    /// Path of the watched file
    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Snapshot stored by the last check
    pub fn snapshot(&self) -> StatSnapshot {
        self.state.snapshot.get()
    }

    /// Stop watching. Immediate and idempotent: no callback fires for this
    /// file after cancellation, including later in a pass already underway.
    pub fn cancel(&self) {
        self.state.cancelled.set(true);
    }

    /// Check if the watch has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.get()
    }
}

struct NotifierInner {
    dirs: RefCell<Vec<Rc<WatchedDir>>>,
    wake_fd: Cell<Option<RawFd>>,
    own_signal: bool,
}

/// Caller-owned watch registry and dispatch context.
///
/// dnotify reports only "something in some watched directory changed", with
/// no payload, so a single SIGIO wake fans out to a re-check of every
/// registered directory. The SIGIO registration itself is process-wide:
/// construct one `Notifier` per process (clones share the same registry and
/// are fine). The handler is installed on the first [`watch_dir`] call and
/// never removed.
///
/// [`watch_dir`]: Notifier::watch_dir
#[derive(Clone)]
pub struct Notifier {
    inner: Rc<NotifierInner>,
}

impl Notifier {
    /// Create a notifier that owns the process's SIGIO handler
    pub fn new() -> Notifier {
        Notifier {
            inner: Rc::new(NotifierInner {
                dirs: RefCell::new(Vec::new()),
                wake_fd: Cell::new(None),
                own_signal: true,
            }),
        }
    }

    /// Create a notifier without installing a SIGIO handler.
    ///
    /// For callers that receive SIGIO through some other machinery (the
    /// async wrapper hands the signal to tokio) and drive [`dispatch`]
    /// themselves. [`wait`] and [`poll`] are inert on such a notifier.
    ///
    /// [`dispatch`]: Notifier::dispatch
    /// [`wait`]: Notifier::wait
    /// [`poll`]: Notifier::poll
    pub fn without_signal_handler() -> Notifier {
        Notifier {
            inner: Rc::new(NotifierInner {
                dirs: RefCell::new(Vec::new()),
                wake_fd: Cell::new(None),
                own_signal: false,
            }),
        }
    }

    /// Watch a directory with the default content-event mask
    pub fn watch_dir(&self, path: impl AsRef<Path>) -> Result<DirWatch> {
        self.watch_dir_with(path, NotifyFlags::default())
    }

    /// Watch a directory with an explicit event mask.
    ///
    /// Directories are deduplicated by the given path: a repeat watch
    /// returns a handle to the existing entry with the masks merged.
    pub fn watch_dir_with(&self, path: impl AsRef<Path>, mask: NotifyFlags) -> Result<DirWatch> {
        let path = path.as_ref();

        if let Some(existing) = self.find_dir(path) {
            let merged = existing.state.mask.get() | mask;
            existing.state.mask.set(merged);
            existing
                .state
                .rearm()
                .map_err(|e| SuspendError::directory_open(path, e))?;
            return Ok(existing);
        }

        let dir = File::open(path).map_err(|e| SuspendError::directory_open(path, e))?;

        // The handler must exist before the first arm: SIGIO's default
        // disposition terminates the process.
        if self.inner.own_signal && self.inner.wake_fd.get().is_none() {
            let fd = linux::install_wake_handler()?;
            self.inner.wake_fd.set(Some(fd));
        }

        let state = Rc::new(WatchedDir {
            path: path.to_path_buf(),
            dir,
            mask: Cell::new(mask),
            files: RefCell::new(Vec::new()),
            callbacks: RefCell::new(Vec::new()),
        });
        state
            .rearm()
            .map_err(|e| SuspendError::directory_open(path, e))?;
        self.inner.dirs.borrow_mut().push(Rc::clone(&state));
        Ok(DirWatch { state })
    }

    fn find_dir(&self, path: &Path) -> Option<DirWatch> {
        self.inner
            .dirs
            .borrow()
            .iter()
            .find(|d| d.path == path)
            .map(|d| DirWatch {
                state: Rc::clone(d),
            })
    }

    /// Paths of all watched directories, in registration order
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.inner
            .dirs
            .borrow()
            .iter()
            .map(|d| d.path.clone())
            .collect()
    }

    /// Run one full check pass over every watched directory, in
    /// registration order.
    ///
    /// Each directory is re-armed before it is checked; dnotify delivery is
    /// one-shot per arming, so skipping the re-arm would silently drop
    /// every later change. A change racing the check itself is therefore
    /// observed on a following pass rather than lost, at the cost of
    /// duplicate passes, which handlers tolerate by contract.
    pub fn dispatch(&self) {
        let dirs: Vec<Rc<WatchedDir>> = self.inner.dirs.borrow().clone();
        for dir in dirs {
            if let Err(err) = dir.rearm() {
                log::warn!(
                    "could not re-arm watch on {}: {}",
                    dir.path.display(),
                    err
                );
            }
            dir.check();
        }
    }

    /// Dispatch if a SIGIO wake is pending; returns whether a pass ran
    pub fn poll(&self) -> bool {
        if !linux::take_wake() {
            return false;
        }
        if let Some(fd) = self.inner.wake_fd.get() {
            linux::drain_wake(fd);
        }
        self.dispatch();
        true
    }

    /// Check if this notifier can block in [`wait`]: true once the wake
    /// channel exists, which happens on the first directory watch. Always
    /// false for a notifier created with [`without_signal_handler`].
    ///
    /// [`wait`]: Notifier::wait
    /// [`without_signal_handler`]: Notifier::without_signal_handler
    pub fn can_wait(&self) -> bool {
        self.inner.wake_fd.get().is_some()
    }

    /// Block until the next SIGIO wake, then dispatch.
    ///
    /// Errors with [`SuspendError::NoSignalHandler`] before the first
    /// directory watch or on a notifier created with
    /// [`without_signal_handler`].
    ///
    /// [`without_signal_handler`]: Notifier::without_signal_handler
    pub fn wait(&self) -> Result<()> {
        let fd = self
            .inner
            .wake_fd
            .get()
            .ok_or(SuspendError::NoSignalHandler)?;
        linux::wait_wake(fd)?;
        linux::take_wake();
        self.dispatch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn counting_handler(count: Rc<Cell<u32>>) -> impl Fn(&FileEvent<'_>) {
        move |_event: &FileEvent<'_>| count.set(count.get() + 1)
    }

    #[test]
    fn test_watch_file_fires_once_per_change() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let handle = notifier.watch_dir(dir.path()).unwrap();

        let count = Rc::new(Cell::new(0u32));
        let watch = handle.watch_file("a", counting_handler(Rc::clone(&count)));
        assert!(!watch.snapshot().exists());

        fs::write(dir.path().join("a"), b"hello").unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 1);
        assert_eq!(watch.snapshot().size, 5);

        // no change: a redundant pass stays silent
        notifier.dispatch();
        assert_eq!(count.get(), 1);

        fs::write(dir.path().join("a"), b"").unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 2);
        assert_eq!(watch.snapshot().size, 0);

        fs::remove_file(dir.path().join("a")).unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 3);
        assert_eq!(watch.snapshot(), StatSnapshot::MISSING);

        notifier.dispatch();
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn test_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let err = notifier.watch_dir(dir.path().join("absent")).err().unwrap();
        assert!(matches!(err, SuspendError::DirectoryOpen { .. }));
    }

    #[test]
    fn test_dir_dedup_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let first = notifier.watch_dir(dir.path()).unwrap();
        let second = notifier.watch_dir(dir.path()).unwrap();
        assert_eq!(first.path(), second.path());
        assert_eq!(notifier.watched_paths().len(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent_and_silences() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let handle = notifier.watch_dir(dir.path()).unwrap();

        let count = Rc::new(Cell::new(0u32));
        let watch = handle.watch_file("a", counting_handler(Rc::clone(&count)));

        watch.cancel();
        watch.cancel();
        assert!(watch.is_cancelled());

        fs::write(dir.path().join("a"), b"data").unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_cancel_during_pass_suppresses_callback() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let handle = notifier.watch_dir(dir.path()).unwrap();

        let count = Rc::new(Cell::new(0u32));
        let watch = handle.watch_file("a", counting_handler(Rc::clone(&count)));

        // dir-wide callbacks run before per-file checks, so a cancel from
        // one must silence the file within the same pass
        let victim = watch.clone();
        handle.watch_all(move || {
            victim.cancel();
            false
        });

        fs::write(dir.path().join("a"), b"data").unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 0);

        fs::write(dir.path().join("a"), b"more data").unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_watch_all_keep_flag() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let handle = notifier.watch_dir(dir.path()).unwrap();

        let seen = Rc::new(Cell::new(0u32));
        let keep = Rc::new(Cell::new(true));
        let seen_inner = Rc::clone(&seen);
        let keep_inner = Rc::clone(&keep);
        handle.watch_all(move || {
            seen_inner.set(seen_inner.get() + 1);
            keep_inner.get()
        });

        notifier.dispatch();
        notifier.dispatch();
        assert_eq!(seen.get(), 2);

        keep.set(false);
        notifier.dispatch();
        assert_eq!(seen.get(), 3);

        // returning false deregistered it
        notifier.dispatch();
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn test_handler_may_register_watches_mid_pass() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let handle = notifier.watch_dir(dir.path()).unwrap();

        let late_count = Rc::new(Cell::new(0u32));
        let count = Rc::new(Cell::new(0u32));
        let inner_handle = handle.clone();
        let inner_late = Rc::clone(&late_count);
        let inner_count = Rc::clone(&count);
        handle.watch_file("a", move |_event: &FileEvent<'_>| {
            inner_count.set(inner_count.get() + 1);
            if inner_count.get() == 1 {
                inner_handle.watch_file("b", counting_handler(Rc::clone(&inner_late)));
            }
        });

        fs::write(dir.path().join("a"), b"x").unwrap();
        fs::write(dir.path().join("b"), b"y").unwrap();
        notifier.dispatch();
        assert_eq!(count.get(), 1);
        // registered mid-pass with a live snapshot; nothing to report yet
        assert_eq!(late_count.get(), 0);

        fs::write(dir.path().join("b"), b"yy").unwrap();
        notifier.dispatch();
        assert_eq!(late_count.get(), 1);
    }

    #[test]
    fn test_rearm_failure_does_not_stop_the_pass() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let first = notifier.watch_dir(dir_a.path()).unwrap();
        let second = notifier.watch_dir(dir_b.path()).unwrap();

        let count_a = Rc::new(Cell::new(0u32));
        let count_b = Rc::new(Cell::new(0u32));
        first.watch_file("a", counting_handler(Rc::clone(&count_a)));
        second.watch_file("b", counting_handler(Rc::clone(&count_b)));

        fs::write(dir_a.path().join("a"), b"x").unwrap();
        fs::write(dir_b.path().join("b"), b"y").unwrap();

        // point the first directory's descriptor at /dev/null so its
        // re-arm fails; snapshots go by path, so the checks still see
        // both files
        let null = File::open("/dev/null").unwrap();
        let replaced = unsafe { libc::dup2(null.as_raw_fd(), first.as_raw_fd()) };
        assert_ne!(replaced, -1);

        notifier.dispatch();
        assert_eq!(count_a.get(), 1);
        assert_eq!(count_b.get(), 1);

        // later passes keep checking the broken directory too
        fs::write(dir_a.path().join("a"), b"xx").unwrap();
        notifier.dispatch();
        assert_eq!(count_a.get(), 2);
    }

    #[test]
    fn test_wait_without_handler_errors() {
        let notifier = Notifier::without_signal_handler();
        assert!(matches!(
            notifier.wait(),
            Err(SuspendError::NoSignalHandler)
        ));
    }

    #[test]
    fn test_replaced_event_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let handle = notifier.watch_dir(dir.path()).unwrap();

        fs::write(dir.path().join("a"), b"one").unwrap();
        fs::write(dir.path().join("b"), b"two").unwrap();

        let replaced = Rc::new(Cell::new(false));
        let inner = Rc::clone(&replaced);
        handle.watch_file("a", move |event: &FileEvent<'_>| {
            inner.set(event.is_replaced());
        });

        fs::rename(dir.path().join("b"), dir.path().join("a")).unwrap();
        notifier.dispatch();
        assert!(replaced.get());
    }
}
