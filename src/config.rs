//! Daemon location and protocol-dialect configuration

use std::path::PathBuf;

/// Directory the current daemon generation uses
pub const DEFAULT_ROOT: &str = "/run/suspend";

pub(crate) const WATCHING: &str = "watching";
pub(crate) const WATCHING_NEXT: &str = "watching-next";
const IMMEDIATE: &str = "immediate";
const DISABLED: &str = "disabled";
const REQUEST: &str = "request";

/// How the daemon signals that a suspend/resume cycle has completed.
///
/// Two daemon generations speak two dialects. Which one is in effect is a
/// deployment choice the client must be told about; it is never guessed
/// from observed behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// The daemon renames the next phase file over the current one, so the
    /// client's held descriptor and a fresh stat of the current path end
    /// up sharing an inode
    Rename,
    /// The current phase path's size returns to zero once the cycle is over
    Size,
}

impl Default for ProtocolVariant {
    fn default() -> Self {
        ProtocolVariant::Rename
    }
}

/// Where the suspend daemon lives and which dialect it speaks.
///
/// The default root is `/run/suspend`; older daemons kept their files under
/// `/var/run/suspend`, which makes `root` worth configuring on legacy
/// hosts. The file names inside the root are fixed protocol constants.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding the daemon's phase and guard files
    pub root: PathBuf,
    /// Cycle-completion signal in effect
    pub variant: ProtocolVariant,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            root: PathBuf::from(DEFAULT_ROOT),
            variant: ProtocolVariant::default(),
        }
    }
}

impl DaemonConfig {
    /// Configuration for a daemon rooted at the given directory
    pub fn at(root: impl Into<PathBuf>) -> DaemonConfig {
        DaemonConfig {
            root: root.into(),
            variant: ProtocolVariant::default(),
        }
    }

    /// Select the protocol variant
    pub fn with_variant(mut self, variant: ProtocolVariant) -> DaemonConfig {
        self.variant = variant;
        self
    }

    /// The current phase file; clients hold a shared lock on it while they
    /// object to suspending
    pub fn watching(&self) -> PathBuf {
        self.root.join(WATCHING)
    }

    /// The next phase file, staged by the daemon when it announces a
    /// pending suspend
    pub fn watching_next(&self) -> PathBuf {
        self.root.join(WATCHING_NEXT)
    }

    /// Exclusive-lock guard file; holding it blocks suspend unconditionally
    pub fn immediate(&self) -> PathBuf {
        self.root.join(IMMEDIATE)
    }

    /// Shared-lock guard file; holding it disables suspend entirely
    pub fn disabled(&self) -> PathBuf {
        self.root.join(DISABLED)
    }

    /// One-shot suspend request file
    pub fn request(&self) -> PathBuf {
        self.root.join(REQUEST)
    }
}
