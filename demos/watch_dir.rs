use std::env;

use suspend_rs::{FileEvent, Notifier};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = env::args().nth(1).unwrap_or_else(|| ".".to_string());

    let notifier = Notifier::new();
    let dir = notifier.watch_dir(&path)?;
    println!("Watching directory: {}", dir.path().display());

    // Any further arguments are file names to watch individually
    let mut watches = Vec::new();
    for name in env::args().skip(2) {
        let label = name.clone();
        watches.push(dir.watch_file(&name, move |event: &FileEvent<'_>| {
            if event.is_created() {
                println!("{label}: created, {} bytes", event.current.size);
            } else if event.is_deleted() {
                println!("{label}: deleted");
            } else if event.is_replaced() {
                println!(
                    "{label}: replaced, inode {} is now {}",
                    event.previous.ino, event.current.ino
                );
            } else {
                match event.current.modified_at() {
                    Some(when) => println!(
                        "{label}: modified at {when}, {} bytes",
                        event.current.size
                    ),
                    None => println!("{label}: modified, {} bytes", event.current.size),
                }
            }
        }));
    }

    if watches.is_empty() {
        dir.watch_all(|| {
            println!("something in the directory changed");
            true
        });
    }

    println!("Press Ctrl+C to stop.");
    loop {
        notifier.wait()?;
    }
}
