//! Asking the daemon to start a suspend cycle right away.

use std::cell::Cell;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::rc::Rc;

use crate::config::DaemonConfig;
use crate::error::{Result, SuspendError};
use crate::stat::StatSnapshot;
use crate::watch::{FileEvent, Notifier};

/// How the daemon answered a suspend request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A full suspend/resume cycle ran
    Suspended,
    /// The daemon refused, typically because a blocker held the guard lock
    Blocked,
}

/// Ask the daemon to suspend now and wait for its verdict.
///
/// Creates the request file under the daemon root; the daemon removes it
/// once the request has been handled, either by running a suspend cycle
/// or by refusing. The two are told apart afterwards by whether the
/// current phase file was rotated: the descriptor opened before the
/// request still naming the same inode means nothing happened.
///
/// Blocks in `notifier.wait()` until the request file disappears, so the
/// calling thread must be the one receiving change notifications. Only
/// daemons speaking the rename dialect understand the request file; under
/// [`ProtocolVariant::Size`](crate::ProtocolVariant::Size) there is
/// nobody to answer and this call waits indefinitely.
///
/// The notifier must own the SIGIO handler. One created with
/// [`Notifier::without_signal_handler`] (the async wrapper's inner
/// notifier, for instance) cannot block, and this returns
/// [`SuspendError::NoSignalHandler`] before the request file is created.
pub fn request_suspend(notifier: &Notifier, config: &DaemonConfig) -> Result<RequestOutcome> {
    let dir = notifier.watch_dir(&config.root)?;

    // refuse up front: failing in the wait loop below would strand the
    // request file for the daemon to garbage-collect
    if !notifier.can_wait() {
        return Err(SuspendError::NoSignalHandler);
    }

    // snapshot the phase identity before asking, then ask
    let watching_path = config.watching();
    let baseline =
        File::open(&watching_path).map_err(|e| SuspendError::lock_file(&watching_path, e))?;
    let request_path = config.request();
    drop(File::create(&request_path).map_err(|e| SuspendError::lock_file(&request_path, e))?);

    let gone = Rc::new(Cell::new(false));
    let flag = Rc::clone(&gone);
    let watch = dir.watch_file("request", move |event: &FileEvent<'_>| {
        if !event.current.exists() {
            flag.set(true);
        }
    });

    let waited = loop {
        // the path check covers a removal that slipped in before the
        // watch was registered
        if gone.get() || !request_path.exists() {
            break Ok(());
        }
        if let Err(err) = notifier.wait() {
            break Err(err);
        }
    };
    watch.cancel();
    waited?;

    classify(&baseline, &watching_path)
}

/// Decide what the daemon did from the phase file left behind
fn classify(baseline: &File, watching: &Path) -> Result<RequestOutcome> {
    let fresh = StatSnapshot::capture(watching);
    if !fresh.exists() {
        return Err(SuspendError::protocol(
            "current phase file vanished while the request was pending",
        ));
    }
    let held = baseline.metadata()?;
    if held.ino() == fresh.ino {
        Ok(RequestOutcome::Blocked)
    } else {
        Ok(RequestOutcome::Suspended)
    }
}
