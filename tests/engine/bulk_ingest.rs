//! Bulk Ingestion Tests
//!
//! Bulk writers split transparently at engine limits, and every entry
//! written before commit is readable afterwards.

use crate::common::*;

/// Test: M entries over the per-transaction limit are all readable
#[test]
fn test_entries_beyond_limit_all_readable() {
    for kind in ENGINE_KINDS {
        let env = TestRegistry::new();
        let store = env.store("ingest", kind);
        let m = 2_000;

        let mut bulk = store.bulk(true).unwrap();
        for i in 0..m {
            bulk.set(format!("doc-{i:05}").as_bytes(), format!("body {i}").as_bytes())
                .unwrap();
        }
        let splits = bulk.splits();
        assert!(splits >= m / 256, "only {splits} splits for {m} entries");
        assert_eq!(bulk.written(), m);
        bulk.commit().unwrap();
        drop(bulk);

        let keys: Vec<Vec<u8>> = (0..m).map(|i| format!("doc-{i:05}").into_bytes()).collect();
        let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
        let found = store.get_many(&refs).unwrap();
        assert_eq!(found.len(), m);
        assert_eq!(found[&b"doc-01999".to_vec()], b"body 1999");
    }
}

/// Test: Overwrites and deletes inside one bulk job resolve to the last op
#[test]
fn test_last_op_wins_across_splits() {
    for kind in ENGINE_KINDS {
        let env = TestRegistry::new();
        let store = env.store("ops", kind);
        let mut bulk = store.bulk(true).unwrap();
        bulk.set(b"target", b"first").unwrap();
        for i in 0..600 {
            bulk.set(format!("filler-{i}").as_bytes(), b"x").unwrap();
        }
        bulk.set(b"target", b"second").unwrap();
        bulk.set(b"doomed", b"x").unwrap();
        for i in 0..600 {
            bulk.set(format!("filler2-{i}").as_bytes(), b"x").unwrap();
        }
        bulk.delete(b"doomed").unwrap();
        bulk.commit().unwrap();
        drop(bulk);

        assert_eq!(store.get(b"target").unwrap(), b"second");
        assert!(store.get(b"doomed").unwrap_err().is_not_found());
    }
}

/// Test: A spent writer refuses every call
#[test]
fn test_writer_is_spent_after_commit() {
    let env = TestRegistry::new();
    let store = env.store("spent", EngineKind::Lsm);
    let mut bulk = store.bulk(true).unwrap();
    bulk.set(b"a", b"1").unwrap();
    bulk.commit().unwrap();

    for result in [bulk.set(b"b", b"2"), bulk.delete(b"a"), bulk.commit()] {
        assert!(matches!(result, Err(StorageError::BulkSpent { .. })));
    }
    assert_eq!(bulk.staged(), 0);
}

/// Test: Closing the store under an open writer fails its commit
#[test]
fn test_commit_after_store_close_fails() {
    let env = TestRegistry::new();
    let store = env.store("closing", EngineKind::OrderedLog);
    let mut bulk = store.bulk(true).unwrap();
    bulk.set(b"a", b"1").unwrap();
    env.registry.delete("closing").unwrap();
    assert!(bulk.commit().is_err());
}
