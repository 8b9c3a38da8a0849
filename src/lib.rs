//! An idiomatic Rust client for Linux suspend daemons
//!
//! This crate speaks the dnotify-and-flock protocol used by cooperative
//! suspend daemons. It has two layers: a change notifier that watches
//! directories and files without polling, and a suspend/resume handshake
//! built on top of it that lets an application delay a pending suspend
//! until it is ready, learn when the cycle has completed, and block
//! suspending outright for a critical section.
//!
//! # Features
//!
//! - **Safe abstractions**: all fcntl, flock, and signal plumbing is wrapped
//!   in safe Rust code
//! - **No polling**: a one-shot dnotify subscription per directory, re-armed
//!   on every delivery, with stat comparison suppressing duplicate callbacks
//! - **Handshake state machine**: shared-lock phases, readiness callbacks,
//!   resume detection for both daemon dialects
//! - **Async support**: both synchronous (raw SIGIO) and tokio-driven event
//!   loops
//!
//! # Examples
//!
//! ## Watching files
//!
//! ```no_run
//! use suspend_rs::{FileEvent, Notifier};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let notifier = Notifier::new();
//!     let dir = notifier.watch_dir("/run/suspend")?;
//!
//!     let _watch = dir.watch_file("watching", |event: &FileEvent<'_>| {
//!         println!("phase file changed: {:?}", event.current);
//!     });
//!
//!     loop {
//!         notifier.wait()?;
//!     }
//! }
//! ```
//!
//! ## Cooperating with the suspend daemon
//!
//! ```no_run
//! use suspend_rs::{DaemonConfig, Notifier, SuspendHandler, SuspendMonitor};
//!
//! struct Saver;
//!
//! impl SuspendHandler for Saver {
//!     fn before_suspend(&self) -> bool {
//!         println!("flushing state, letting the daemon proceed");
//!         true
//!     }
//!
//!     fn after_resume(&self) {
//!         println!("back from suspend");
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let notifier = Notifier::new();
//!     let _monitor = SuspendMonitor::new(&notifier, DaemonConfig::default(), Saver)?;
//!
//!     loop {
//!         notifier.wait()?;
//!     }
//! }
//! ```
//!
//! ## Async usage
//!
//! ```no_run
//! use suspend_rs::{AsyncNotifier, FileEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut notifier = AsyncNotifier::new()?;
//!     let dir = notifier.watch_dir("/run/suspend")?;
//!
//!     let _watch = dir.watch_file("watching", |event: &FileEvent<'_>| {
//!         println!("phase file changed: {:?}", event.current);
//!     });
//!
//!     notifier.run().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod flags;
pub mod linux;
pub mod stat;
pub mod watch;
pub mod config;
pub mod monitor;
pub mod blocker;
pub mod request;
#[cfg(feature = "tokio")]
pub mod async_watch;

pub use error::{Result, SuspendError};
pub use flags::{LockFlags, NotifyFlags};
pub use stat::StatSnapshot;
pub use watch::{DirHandler, DirWatch, FileEvent, FileHandler, FileWatch, Notifier};
pub use config::{DaemonConfig, ProtocolVariant, DEFAULT_ROOT};
pub use monitor::{MonitorState, SuspendHandler, SuspendMonitor};
pub use blocker::{abort_cycle, SuspendBlocker};
pub use request::{request_suspend, RequestOutcome};
#[cfg(feature = "tokio")]
pub use async_watch::AsyncNotifier;
