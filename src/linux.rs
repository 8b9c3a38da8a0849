//! Linux-specific constants and plumbing for dnotify and advisory locks
//!
//! This module contains the dnotify constants (not exposed by all libc
//! versions), thin wrappers over the `fcntl`/`flock` calls the rest of the
//! crate is built on, and the process-wide SIGIO wake channel.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

use libc::{c_int, c_ulong};

// Directory notification event bits, from the kernel's fcntl.h
pub const DN_ACCESS: c_ulong = 0x00000001;
pub const DN_MODIFY: c_ulong = 0x00000002;
pub const DN_CREATE: c_ulong = 0x00000004;
pub const DN_DELETE: c_ulong = 0x00000008;
pub const DN_RENAME: c_ulong = 0x00000010;
pub const DN_ATTRIB: c_ulong = 0x00000020;
pub const DN_MULTISHOT: c_ulong = 0x80000000;

// F_LINUX_SPECIFIC_BASE (1024) + 2
pub const F_NOTIFY: c_int = 1026;

/// Request SIGIO delivery for content events in an open directory.
///
/// The subscription is one-shot per arming unless the mask carries
/// `DN_MULTISHOT`: after a delivery nothing further is reported until the
/// directory is armed again.
pub fn arm_dnotify(dir: &File, mask: c_ulong) -> io::Result<()> {
    let rc = unsafe { libc::fcntl(dir.as_raw_fd(), F_NOTIFY, mask) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Apply an advisory lock operation to an open file.
///
/// EINTR means a watch notification landed mid-call; the attempt is retried
/// without sleeping, never surfaced. A contended `LOCK_NB` attempt returns
/// the `WouldBlock` I/O error.
pub fn flock(file: &File, operation: c_int) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

// SIGIO carries no payload, so the handler records only "something changed
// somewhere": an atomic flag for pollers, plus one byte down a non-blocking
// self-pipe so a blocked `wait` cannot miss a signal that lands between its
// last dispatch and the block.
static WAKE_CHANNEL: Mutex<Option<RawFd>> = Mutex::new(None);
static WAKE_PENDING: AtomicBool = AtomicBool::new(false);
static WAKE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn sigio_handler(_signal: c_int) {
    WAKE_PENDING.store(true, Ordering::SeqCst);
    let fd = WAKE_WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = 1u8;
        // write(2) is async-signal-safe; a full pipe is fine, the byte
        // already queued is enough to wake the reader
        unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    }
}

/// Install the process-wide SIGIO handler and wake pipe, once.
///
/// Installed without SA_RESTART so blocking lock and poll calls observe
/// EINTR and their retry loops run. Returns the read end of the wake pipe;
/// repeat calls return the same descriptor.
pub(crate) fn install_wake_handler() -> io::Result<RawFd> {
    let mut channel = WAKE_CHANNEL.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(fd) = *channel {
        return Ok(fd);
    }

    let mut fds = [0 as c_int; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    WAKE_WRITE_FD.store(fds[1], Ordering::SeqCst);

    let handler: extern "C" fn(c_int) = sigio_handler;
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as libc::sighandler_t;
    action.sa_flags = 0;
    unsafe { libc::sigemptyset(&mut action.sa_mask) };
    let rc = unsafe { libc::sigaction(libc::SIGIO, &action, std::ptr::null_mut()) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        WAKE_WRITE_FD.store(-1, Ordering::SeqCst);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
        return Err(err);
    }

    *channel = Some(fds[0]);
    Ok(fds[0])
}

/// Consume the pending-wake flag.
pub(crate) fn take_wake() -> bool {
    WAKE_PENDING.swap(false, Ordering::SeqCst)
}

/// Block until the wake pipe is readable, then drain it.
pub(crate) fn wait_wake(fd: RawFd) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
        if rc > 0 {
            drain_wake(fd);
            return Ok(());
        }
        if rc == 0 {
            continue;
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Empty the wake pipe without blocking.
pub(crate) fn drain_wake(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            continue;
        }
        if n < 0 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return;
    }
}
