//! Read-your-write Tests
//!
//! Property tests: for any sequence of sets and deletes, every read returns
//! the last value written, and absent keys are NotFound.

use std::collections::HashMap;

use proptest::prelude::*;

use crate::common::*;

#[derive(Debug, Clone)]
enum Op {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn key() -> impl Strategy<Value = Vec<u8>> {
    // Small key space so overwrites and deletes hit existing keys
    prop::collection::vec(0u8..4, 1..3)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key(), prop::collection::vec(any::<u8>(), 0..64)).prop_map(|(k, v)| Op::Set(k, v)),
        1 => key().prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reads_return_last_write(ops in prop::collection::vec(op(), 1..60)) {
        for kind in ENGINE_KINDS {
            let env = TestRegistry::new();
            let store = env.store("ryw", kind);
            let mut expected: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

            for op in &ops {
                match op {
                    Op::Set(k, v) => {
                        store.set(k, v).unwrap();
                        expected.insert(k.clone(), v.clone());
                        prop_assert_eq!(&store.get(k).unwrap(), v);
                    }
                    Op::Delete(k) => {
                        store.delete(k).unwrap();
                        expected.remove(k);
                        prop_assert!(store.get(k).unwrap_err().is_not_found());
                    }
                }
            }

            for (k, v) in &expected {
                prop_assert_eq!(&store.get(k).unwrap(), v);
            }
        }
    }

    #[test]
    fn state_survives_clean_reopen(ops in prop::collection::vec(op(), 1..40)) {
        for kind in ENGINE_KINDS {
            let mut env = TestRegistry::new();
            let mut expected: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
            {
                let store = env.store("reopen", kind);
                for op in &ops {
                    match op {
                        Op::Set(k, v) => {
                            store.set(k, v).unwrap();
                            expected.insert(k.clone(), v.clone());
                        }
                        Op::Delete(k) => {
                            store.delete(k).unwrap();
                            expected.remove(k);
                        }
                    }
                }
            }
            env.reopen();
            let store = env.store("reopen", kind);
            for op in &ops {
                let k = match op {
                    Op::Set(k, _) | Op::Delete(k) => k,
                };
                match expected.get(k) {
                    Some(v) => prop_assert_eq!(&store.get(k).unwrap(), v),
                    None => prop_assert!(store.get(k).unwrap_err().is_not_found()),
                }
            }
        }
    }
}

/// Test: Empty values are values, not deletes
#[test]
fn test_empty_value_round_trips() {
    for kind in ENGINE_KINDS {
        let env = TestRegistry::new();
        let store = env.store("empty", kind);
        store.set(b"k", b"").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Vec::<u8>::new());
    }
}

/// Test: Concurrent writers to distinct keys all land
#[test]
fn test_concurrent_writers_distinct_keys() {
    for kind in ENGINE_KINDS {
        let env = TestRegistry::new();
        let store = env.store("concurrent", kind);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store
                            .set(format!("{t}-{i}").as_bytes(), format!("{i}").as_bytes())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for t in 0..4 {
            for i in 0..100 {
                assert_eq!(
                    store.get(format!("{t}-{i}").as_bytes()).unwrap(),
                    format!("{i}").into_bytes()
                );
            }
        }
    }
}
