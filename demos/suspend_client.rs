use std::env;

use suspend_rs::{DaemonConfig, Notifier, SuspendHandler, SuspendMonitor, DEFAULT_ROOT};

struct Announcer;

impl SuspendHandler for Announcer {
    fn before_suspend(&self) -> bool {
        println!("daemon wants to suspend; nothing to flush, go ahead");
        true
    }

    fn after_resume(&self) {
        println!("back from suspend");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ROOT.to_string());

    let notifier = Notifier::new();
    let monitor = SuspendMonitor::new(&notifier, DaemonConfig::at(&root), Announcer)?;
    println!(
        "Attached to suspend daemon at {}; state: {:?}",
        root,
        monitor.state()
    );

    println!("Press Ctrl+C to stop.");
    loop {
        notifier.wait()?;
    }
}
