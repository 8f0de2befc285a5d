//! Index Isolation Tests
//!
//! Stores for different indexes never see each other's data, whichever
//! engines back them, and data never leaks across namespaces of one store.

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::json;

use crate::common::*;

/// Test: Same key in many indexes holds independent values
#[test]
fn test_same_key_across_indexes() {
    let env = TestRegistry::new();
    let stores: Vec<_> = (0..6)
        .map(|i| env.store(&format!("tenant-{i}"), ENGINE_KINDS[i % 2]))
        .collect();

    for (i, store) in stores.iter().enumerate() {
        store.set(b"config", format!("{i}").as_bytes()).unwrap();
    }
    for (i, store) in stores.iter().enumerate() {
        assert_eq!(store.get(b"config").unwrap(), format!("{i}").into_bytes());
    }

    stores[0].delete(b"config").unwrap();
    assert!(stores[0].get(b"config").unwrap_err().is_not_found());
    assert_eq!(stores[1].get(b"config").unwrap(), b"1");
}

/// Test: Isolation holds while indexes are written concurrently
#[test]
fn test_concurrent_writes_to_different_indexes() {
    let env = TestRegistry::new();
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&env.registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = registry.resolve_default(&format!("idx-{t}")).unwrap();
                barrier.wait();
                for i in 0..50 {
                    store.set(format!("k{i}").as_bytes(), &[t as u8]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4u8 {
        let store = env.registry.get(&format!("idx-{t}")).unwrap();
        for i in 0..50 {
            assert_eq!(store.get(format!("k{i}").as_bytes()).unwrap(), vec![t]);
        }
    }
}

/// Test: Sources and generic data with the same key do not collide
#[test]
fn test_sources_do_not_leak_into_data() {
    for kind in ENGINE_KINDS {
        let env = TestRegistry::new();
        let store = env.store("mixed", kind);
        let sources = SourceStore::new(Arc::clone(&store));

        sources.set_source("42", &json!({"title": "doc"})).unwrap();
        assert!(store.get(b"42").unwrap_err().is_not_found());

        store.set(b"42", b"raw").unwrap();
        assert_eq!(sources.get_source_json("42").unwrap(), json!({"title": "doc"}));
    }
}

/// Test: Deleting one index leaves others open and intact
#[test]
fn test_delete_one_index() {
    let env = TestRegistry::new();
    let a = env.store("a", EngineKind::Lsm);
    let b = env.store("b", EngineKind::Lsm);
    a.set(b"k", b"a").unwrap();
    b.set(b"k", b"b").unwrap();

    env.registry.delete("a").unwrap();
    assert!(a.is_closed());
    assert!(!b.is_closed());
    assert_eq!(b.get(b"k").unwrap(), b"b");
    assert_eq!(env.registry.names(), vec!["b"]);
}
