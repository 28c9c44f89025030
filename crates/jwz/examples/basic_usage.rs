//! Basic jwz usage
//!
//! This example demonstrates:
//! - Initializing and opening a store
//! - Creating topics and posting threaded messages
//! - Listing, fetching by prefix, and full-text search
//! - Reading store statistics
//!
//! Run with: cargo run --example basic_usage

use jwz::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("jwz=info")
        .init();

    let temp_dir = tempfile::tempdir()?;
    let root = Store::init(temp_dir.path())?;
    let store = Store::open(&root)?;
    println!("store at {}", root.display());

    // Topics group related messages under a unique name.
    store.create_topic("deploys", "what shipped and when")?;
    store.create_topic("incidents", "things that went wrong")?;

    // Messages are topic-rooted; replies reference a parent.
    let sender = Sender {
        id: "agent-release".into(),
        name: "careful-heron".into(),
        model: Some("m-large".into()),
        role: None,
    };
    let announce = store.create_message(
        NewMessage::new("deploys", "api v2 rolled out to production").with_sender(sender),
    )?;
    // Spread the writes over distinct milliseconds so the identifier
    // timestamps differ and short prefixes stay unique below.
    std::thread::sleep(std::time::Duration::from_millis(2));
    let question = store.create_message(
        NewMessage::new("deploys", "did latency move?").with_parent(&announce),
    )?;
    std::thread::sleep(std::time::Duration::from_millis(2));
    store.create_message(
        NewMessage::new("deploys", "p99 flat, p50 down 3ms").with_parent(&question),
    )?;

    // Any unique identifier prefix resolves.
    let fetched = store.fetch_message(&announce[..12])?;
    println!(
        "fetched by prefix: {} ({} direct replies)",
        fetched.body, fetched.reply_count
    );

    // A thread is the root plus all transitive replies in creation order.
    println!("thread:");
    for msg in store.thread(&announce)? {
        let marker = if msg.parent_id.is_some() { "  ↳" } else { "•" };
        println!("  {marker} {}", msg.body);
    }

    // Search is phrase-based; operator characters in queries are inert.
    let hits = store.search("latency", None, 10)?;
    println!("search 'latency': {} hit(s)", hits.len());

    let stats = store.stats()?;
    println!(
        "log {} bytes, offset {}, {} topics, {} messages",
        stats.log_bytes, stats.index_offset, stats.topic_count, stats.message_count
    );

    store.close()?;
    Ok(())
}
