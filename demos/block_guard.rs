use std::env;
use std::thread;
use std::time::Duration;

use suspend_rs::{DaemonConfig, SuspendBlocker, DEFAULT_ROOT};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ROOT.to_string());
    let seconds: u64 = env::args().nth(2).as_deref().unwrap_or("10").parse()?;

    let config = DaemonConfig::at(&root);
    let mut blocker = SuspendBlocker::new(&config);

    if blocker.block() {
        println!("Suspend blocked for {seconds}s (guard under {root})");
    } else {
        println!("No suspend daemon at {root}; nothing to block");
    }

    // stand-in for a critical section that must not be interrupted
    thread::sleep(Duration::from_secs(seconds));

    blocker.unblock();
    println!("Suspend unblocked.");
    Ok(())
}
