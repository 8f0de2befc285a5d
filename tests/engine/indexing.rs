//! Indexing Sequence Tests
//!
//! Source first, then index: encode failures persist nothing, index writer
//! failures leave the source behind, and only minted IDs bump the doc count.

use std::sync::Arc;

use serde_json::json;

use crate::common::*;

/// Test: Documents without an ID get sequential minted IDs
#[test]
fn test_minted_ids_insert_and_count() {
    let env = TestRegistry::new();
    let indexer = indexer(env.store("logs", EngineKind::Lsm));

    for expected in ["1", "2", "3"] {
        let outcome = indexer
            .index_document(None, &doc(json!({"msg": expected})))
            .unwrap();
        assert_eq!(outcome.id, expected);
        assert!(outcome.minted);
    }

    let index = indexer.writer();
    assert_eq!(index.count(), 3);
    assert_eq!(*index.calls.lock(), vec!["insert:1", "insert:2", "insert:3"]);
    assert_eq!(index.docs.lock()["2"], r#"{"msg":"2"}"#);
    assert_eq!(indexer.get_document("3").unwrap(), br#"{"msg":"3"}"#);
}

/// Test: Re-indexing an existing ID updates in place without counting
#[test]
fn test_update_in_place() {
    let env = TestRegistry::new();
    let indexer = indexer(env.store("logs", EngineKind::Lsm));
    let minted = indexer
        .index_document(None, &doc(json!({"v": 1})))
        .unwrap();
    indexer
        .index_document(Some(&minted.id), &doc(json!({"v": 2})))
        .unwrap();

    assert_eq!(indexer.writer().count(), 1);
    assert_eq!(
        *indexer.writer().calls.lock(),
        vec!["insert:1".to_string(), "update:1".to_string()]
    );
    assert_eq!(indexer.get_document("1").unwrap(), br#"{"v":2}"#);
}

/// Test: Caller-supplied IDs work on the ordered engine, minting does not
#[test]
fn test_ordered_engine_requires_ids() {
    let env = TestRegistry::new();
    let indexer = indexer(env.store("ordered", EngineKind::OrderedLog));
    indexer
        .index_document(Some("ext-1"), &doc(json!({"a": 1})))
        .unwrap();
    assert!(matches!(
        indexer.index_document(None, &doc(json!({"a": 2}))),
        Err(StorageError::Unsupported { .. })
    ));
    assert_eq!(*indexer.writer().calls.lock(), vec!["update:ext-1"]);
    assert_eq!(indexer.writer().count(), 0);
}

/// Test: Encoder failure leaves neither store touched
#[test]
fn test_encode_failure_persists_nothing() {
    let env = TestRegistry::new();
    let indexer = indexer(env.store("logs", EngineKind::Lsm));
    let err = indexer
        .index_document(Some("bad"), &doc(json!({"reject": true})))
        .unwrap_err();
    assert!(matches!(err, StorageError::Encoding { ref doc_id, .. } if doc_id == "bad"));
    assert!(indexer.get_document("bad").unwrap_err().is_not_found());
    assert!(indexer.writer().calls.lock().is_empty());
}

/// Test: Index writer failure after the source was persisted
///
/// This is the accepted inconsistency window: the source store holds the
/// document, the search index does not, and the doc count is unchanged.
#[test]
fn test_index_failure_leaves_source_ahead() {
    let env = TestRegistry::new();
    let indexer = indexer(env.store("logs", EngineKind::Lsm));
    indexer.writer().set_failing(true);

    let err = indexer
        .index_document(None, &doc(json!({"msg": "orphan"})))
        .unwrap_err();
    assert!(matches!(err, StorageError::IndexWrite { .. }));
    assert_eq!(indexer.get_document("1").unwrap(), br#"{"msg":"orphan"}"#);
    assert!(indexer.writer().docs.lock().is_empty());
    assert_eq!(indexer.writer().count(), 0);

    // Retrying with the minted ID repairs the index
    indexer.writer().set_failing(false);
    indexer
        .index_document(Some("1"), &doc(json!({"msg": "orphan"})))
        .unwrap();
    assert!(indexer.writer().docs.lock().contains_key("1"));
}

/// Test: Delete hits the index before the source
#[test]
fn test_delete_order() {
    let env = TestRegistry::new();
    let indexer = indexer(env.store("logs", EngineKind::Lsm));
    indexer
        .index_document(Some("d"), &doc(json!({"x": 1})))
        .unwrap();

    indexer.writer().set_failing(true);
    assert!(indexer.delete_document("d").is_err());
    assert!(indexer.get_document("d").is_ok());

    indexer.writer().set_failing(false);
    indexer.delete_document("d").unwrap();
    assert!(indexer.get_document("d").unwrap_err().is_not_found());
    assert!(!indexer.writer().docs.lock().contains_key("d"));
}

/// Test: Two indexers on two indexes keep separate sources and sequences
#[test]
fn test_indexers_are_per_index() {
    let env = TestRegistry::new();
    let logs = indexer(env.store("logs", EngineKind::Lsm));
    let metrics = indexer(env.store("metrics", EngineKind::Lsm));

    let a = logs.index_document(None, &doc(json!({"i": "logs"}))).unwrap();
    let b = metrics
        .index_document(None, &doc(json!({"i": "metrics"})))
        .unwrap();
    assert_eq!(a.id, "1");
    assert_eq!(b.id, "1");
    assert_eq!(logs.get_document("1").unwrap(), br#"{"i":"logs"}"#);
    assert_eq!(metrics.get_document("1").unwrap(), br#"{"i":"metrics"}"#);
    assert!(Arc::ptr_eq(
        logs.sources().store(),
        &env.registry.get("logs").unwrap()
    ));
}
