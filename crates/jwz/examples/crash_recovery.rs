//! Index loss and recovery
//!
//! The append-only log is the source of truth; the SQLite index is a
//! rebuildable cache. This example writes a small corpus, deletes the
//! index outright, reopens, and shows that every query still answers.
//!
//! Run with: cargo run --example crash_recovery

use jwz::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("jwz=info")
        .init();

    let temp_dir = tempfile::tempdir()?;
    let root = Store::init(temp_dir.path())?;

    let thread_root;
    {
        let store = Store::open(&root)?;
        store.create_topic("tasks", "work queue")?;
        thread_root = store.create_message(NewMessage::new("tasks", "investigate flaky test"))?;
        store.create_message(
            NewMessage::new("tasks", "bisected to the cache layer").with_parent(&thread_root),
        )?;
        let stats = store.stats()?;
        println!(
            "before: {} messages indexed, offset {} / log {}",
            stats.message_count, stats.index_offset, stats.log_bytes
        );
        store.close()?;
    }

    // Simulate losing the cache entirely.
    for artifact in ["messages.db", "messages.db-wal", "messages.db-shm"] {
        let path = root.join(artifact);
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("removed {}", path.display());
        }
    }

    // Reopen: replay rebuilds the index from byte zero before any query.
    let store = Store::open(&root)?;
    let thread = store.thread(&thread_root)?;
    println!("after rebuild, thread has {} messages:", thread.len());
    for msg in &thread {
        println!("  {} {}", msg.id, msg.body);
    }

    let report = store.check_integrity()?;
    println!(
        "integrity: {}",
        if report.is_clean() { "clean" } else { "issues found" }
    );

    let stats = store.stats()?;
    assert_eq!(stats.index_offset, stats.log_bytes);
    println!("offset caught back up: {} bytes", stats.index_offset);

    store.close()?;
    Ok(())
}
