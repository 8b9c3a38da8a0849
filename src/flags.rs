use crate::linux::{
    DN_ACCESS, DN_ATTRIB, DN_CREATE, DN_DELETE, DN_MODIFY, DN_MULTISHOT, DN_RENAME,
};
use bitflags::bitflags;

bitflags! {
    /// Event mask for a dnotify directory subscription
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotifyFlags: u32 {
        /// A file in the directory was read
        const ACCESS = DN_ACCESS as u32;

        /// A file in the directory was written or truncated
        const MODIFY = DN_MODIFY as u32;

        /// A file was created in the directory
        const CREATE = DN_CREATE as u32;

        /// A file was unlinked from the directory
        const DELETE = DN_DELETE as u32;

        /// A file was renamed within the directory
        const RENAME = DN_RENAME as u32;

        /// File attributes changed
        const ATTRIB = DN_ATTRIB as u32;

        /// Keep the subscription armed across deliveries instead of
        /// one-shot delivery
        const MULTISHOT = DN_MULTISHOT as u32;

        // Convenience combination
        const CONTENT_EVENTS = Self::MODIFY.bits() | Self::CREATE.bits() |
                               Self::DELETE.bits() | Self::RENAME.bits();
    }
}

bitflags! {
    /// Operations for BSD-style advisory locks (`flock`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LockFlags: i32 {
        /// Shared lock; any number of holders, excludes exclusive holders
        const SHARED = libc::LOCK_SH;

        /// Exclusive lock; a single holder, excludes everyone else
        const EXCLUSIVE = libc::LOCK_EX;

        /// Fail with `WouldBlock` instead of waiting for a contended lock
        const NONBLOCK = libc::LOCK_NB;

        /// Release a held lock
        const UNLOCK = libc::LOCK_UN;
    }
}

impl Default for NotifyFlags {
    fn default() -> Self {
        NotifyFlags::CONTENT_EVENTS
    }
}

impl Default for LockFlags {
    fn default() -> Self {
        LockFlags::SHARED
    }
}

impl NotifyFlags {
    /// Check if the mask keeps the subscription armed across deliveries
    pub fn is_multishot(&self) -> bool {
        self.contains(NotifyFlags::MULTISHOT)
    }
}

impl LockFlags {
    /// Check if the operation fails immediately when contended
    pub fn is_nonblocking(&self) -> bool {
        self.contains(LockFlags::NONBLOCK)
    }

    /// Check if the operation releases rather than acquires
    pub fn is_unlock(&self) -> bool {
        self.contains(LockFlags::UNLOCK)
    }
}
