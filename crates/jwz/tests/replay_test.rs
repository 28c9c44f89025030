//! Log/index reconciliation: source-of-truth, offset tightness, rebuild.

use std::io::Write;
use std::sync::Arc;

use jwz::prelude::*;
use jwz::{FixedClock, LOG_FILE};
use tempfile::TempDir;

const T0: i64 = 1_600_000_000_000;

fn open_store(clock: &Arc<FixedClock>) -> (Store, TempDir) {
    let dir = TempDir::new().unwrap();
    let root = Store::init(dir.path()).unwrap();
    let config = StoreConfig::default().with_clock(clock.clone());
    let store = Store::open_with_config(&root, config).unwrap();
    (store, dir)
}

fn reopen(store: Store, clock: &Arc<FixedClock>) -> Store {
    let root = store.root().to_path_buf();
    store.close().unwrap();
    Store::open_with_config(&root, StoreConfig::default().with_clock(clock.clone())).unwrap()
}

/// After every successful write the persisted offset equals the log
/// length.
#[test]
fn offset_is_tight_after_every_write() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "").unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.index_offset, stats.log_bytes);

    store.create_message(NewMessage::new("tasks", "one")).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.index_offset, stats.log_bytes);
    assert!(stats.log_bytes > 0);

    assert_eq!(store.replay_lag().unwrap(), 0);
}

/// For a store at rest, the index file is disposable.
#[test]
fn index_is_pure_function_of_the_log() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "work").unwrap();
    let sender = Sender {
        id: "agent-1".into(),
        name: "brave-fox".into(),
        model: None,
        role: Some("author".into()),
    };
    let root = store
        .create_message(NewMessage::new("tasks", "root").with_sender(sender.clone()))
        .unwrap();
    clock.advance(3);
    store
        .create_message(NewMessage::new("tasks", "reply").with_parent(&root))
        .unwrap();

    let before: Vec<Message> = store.thread(&root).unwrap();

    let store_root = store.root().to_path_buf();
    store.close().unwrap();
    for artifact in ["messages.db", "messages.db-wal", "messages.db-shm"] {
        let path = store_root.join(artifact);
        if path.exists() {
            std::fs::remove_file(path).unwrap();
        }
    }

    let store =
        Store::open_with_config(&store_root, StoreConfig::default().with_clock(clock.clone()))
            .unwrap();

    let after: Vec<Message> = store.thread(&root).unwrap();
    assert_eq!(before, after);
    assert_eq!(after[0].sender, Some(sender));

    let stats = store.stats().unwrap();
    assert_eq!(stats.index_offset, stats.log_bytes);
}

/// Replaying the same log again changes nothing.
#[test]
fn re_replay_is_idempotent() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "").unwrap();
    store.create_message(NewMessage::new("tasks", "one")).unwrap();
    store.create_message(NewMessage::new("tasks", "two")).unwrap();

    let stats = store.rebuild().unwrap();
    assert!(stats.rebuilt);
    assert_eq!(stats.records_applied, 3);

    let store = reopen(store, &clock);
    let stats_before = store.stats().unwrap();
    let again = store.rebuild().unwrap();
    assert_eq!(again.records_applied, 3);
    assert_eq!(store.stats().unwrap(), stats_before);
}

/// FTS rowids and message rowids stay in one-to-one correspondence,
/// through writes and through rebuilds.
#[test]
fn fts_rows_match_message_rows() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "").unwrap();
    for body in ["alpha", "beta", "gamma"] {
        store.create_message(NewMessage::new("tasks", body)).unwrap();
    }
    store.rebuild().unwrap();

    let orphans: i64 = store
        .connection()
        .query_row(
            "SELECT (SELECT COUNT(*) FROM (SELECT rowid FROM messages
                     EXCEPT SELECT rowid FROM messages_fts))
                  + (SELECT COUNT(*) FROM (SELECT rowid FROM messages_fts
                     EXCEPT SELECT rowid FROM messages))",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);

    // And search still finds everything exactly once.
    assert_eq!(store.search("beta", None, 10).unwrap().len(), 1);
}

/// Truncating the log below the persisted offset forces a full rebuild.
#[test]
fn truncated_log_triggers_rebuild() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "").unwrap();
    store.create_message(NewMessage::new("tasks", "will vanish")).unwrap();

    let store_root = store.root().to_path_buf();
    let log_path = store_root.join(LOG_FILE);
    store.close().unwrap();

    // Cut the log back to just the topic record.
    let content = std::fs::read_to_string(&log_path).unwrap();
    let first_line_len = content.find('\n').unwrap() + 1;
    let file = std::fs::OpenOptions::new().write(true).open(&log_path).unwrap();
    file.set_len(first_line_len as u64).unwrap();
    drop(file);

    let store =
        Store::open_with_config(&store_root, StoreConfig::default().with_clock(clock.clone()))
            .unwrap();

    assert_eq!(store.list_messages("tasks", 10).unwrap().len(), 0);
    let stats = store.stats().unwrap();
    assert_eq!(stats.message_count, 0);
    assert_eq!(stats.topic_count, 1);
    assert_eq!(stats.index_offset, first_line_len as u64);
    assert_eq!(stats.index_offset, stats.log_bytes);
}

/// Malformed but terminated lines are skipped and consumed; a torn tail
/// without its newline is skipped and *not* consumed.
#[test]
fn malformed_and_torn_lines() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "").unwrap();
    store.create_message(NewMessage::new("tasks", "kept")).unwrap();

    let store_root = store.root().to_path_buf();
    let log_path = store_root.join(LOG_FILE);
    store.close().unwrap();

    // A garbage line some foreign writer completed, then a torn record.
    let torn = r#"{"type":"message","id":"01HX"#;
    let mut file = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(b"definitely not json\n").unwrap();
    file.write_all(torn.as_bytes()).unwrap();
    drop(file);

    let store =
        Store::open_with_config(&store_root, StoreConfig::default().with_clock(clock.clone()))
            .unwrap();

    // The good records survive, the garbage changed nothing.
    assert_eq!(store.list_messages("tasks", 10).unwrap().len(), 1);
    let stats = store.stats().unwrap();
    assert_eq!(stats.message_count, 1);

    // Offset covers the garbage line but stops before the torn tail.
    assert_eq!(stats.index_offset, stats.log_bytes - torn.len() as u64);
    assert_eq!(store.replay_lag().unwrap(), torn.len() as u64);
}

/// A writer that appended while no index existed yet is picked up on the
/// next open, not before queries are served.
#[test]
fn foreign_appends_are_ingested_on_open() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "").unwrap();
    let store_root = store.root().to_path_buf();
    let log_path = store_root.join(LOG_FILE);
    store.close().unwrap();

    // Hand-written record in the documented line grammar.
    let line = format!(
        "{}\n",
        r#"{"type":"message","id":"01HX5KA9Q3E8ZJ1N6M2P4R7T9V","topic_id":"TOPIC","parent_id":null,"body":"foreign","created_at":1600000000123,"sender":null,"git":null}"#
    );
    // Point the record at the real topic id.
    let store2 =
        Store::open_with_config(&store_root, StoreConfig::default().with_clock(clock.clone()))
            .unwrap();
    let topic_id = store2.fetch_topic("tasks").unwrap().id;
    store2.close().unwrap();
    let line = line.replace("TOPIC", &topic_id);

    let mut file = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(line.as_bytes()).unwrap();
    drop(file);

    let store =
        Store::open_with_config(&store_root, StoreConfig::default().with_clock(clock.clone()))
            .unwrap();
    let listing = store.list_messages("tasks", 10).unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].body, "foreign");
    assert_eq!(listing[0].id, "01HX5KA9Q3E8ZJ1N6M2P4R7T9V");
    // And it is searchable, so the FTS row was mirrored during replay.
    assert_eq!(store.search("foreign", None, 10).unwrap().len(), 1);
}

/// Blobs are not logged: an index wipe loses them, a rebuild keeps them.
#[test]
fn blob_rows_survive_rebuild_but_not_index_loss() {
    let clock = FixedClock::new(T0);
    let (store, _dir) = open_store(&clock);

    store.create_topic("tasks", "").unwrap();
    let blob = store.put_blob(b"payload", None).unwrap();

    store.rebuild().unwrap();
    assert!(store.fetch_blob(&blob).is_ok());

    let store_root = store.root().to_path_buf();
    store.close().unwrap();
    for artifact in ["messages.db", "messages.db-wal", "messages.db-shm"] {
        let path = store_root.join(artifact);
        if path.exists() {
            std::fs::remove_file(path).unwrap();
        }
    }
    let store =
        Store::open_with_config(&store_root, StoreConfig::default().with_clock(clock.clone()))
            .unwrap();
    assert!(matches!(
        store.fetch_blob(&blob),
        Err(StoreError::BlobNotFound(_))
    ));
}
