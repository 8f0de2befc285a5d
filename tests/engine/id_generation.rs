//! ID Generation Tests
//!
//! IDs are strictly increasing decimal strings, unique across threads, and
//! never handed out twice, whether the store was closed cleanly or crashed.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;

use crate::common::*;

fn mint(store: &IndexStore) -> u64 {
    store
        .generate_id()
        .unwrap()
        .parse()
        .expect("ids are decimal integers")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any interleaving of minting, clean restarts and crashes keeps IDs
    /// strictly increasing.
    #[test]
    fn ids_increase_across_restarts(
        lease in 1u64..20,
        rounds in prop::collection::vec((1usize..40, any::<bool>()), 1..6),
    ) {
        let mut env = TestRegistry::with_config(|c| c.with_id_lease_size(lease));
        let mut last = 0u64;
        let mut seen = HashSet::new();

        for (count, clean) in rounds {
            {
                let store = env.store("ids", EngineKind::Lsm);
                for _ in 0..count {
                    let id = mint(&store);
                    prop_assert!(id > last, "id {} not above {}", id, last);
                    prop_assert!(seen.insert(id));
                    last = id;
                }
            }
            if clean {
                env.reopen();
            } else {
                env.crash();
            }
        }
    }
}

/// Test: Fresh index mints "1", then "2"
#[test]
fn test_fresh_index_starts_at_one() {
    let env = TestRegistry::new();
    let store = env.store("fresh", EngineKind::Lsm);
    assert_eq!(store.generate_id().unwrap(), "1");
    assert_eq!(store.generate_id().unwrap(), "2");
}

/// Test: Crash mid-lease resumes at or beyond the lease bound
#[test]
fn test_crash_mid_lease_skips_to_bound() {
    let mut env = TestRegistry::with_config(|c| c.with_id_lease_size(100));
    {
        let store = env.store("crash", EngineKind::Lsm);
        assert_eq!(mint(&store), 1);
        assert_eq!(mint(&store), 2);
    }
    env.crash();

    let store = env.store("crash", EngineKind::Lsm);
    let next = mint(&store);
    assert!(next >= 101, "got {next}");
}

/// Test: Clean close releases the unused lease so no gap appears
#[test]
fn test_clean_close_continues_without_gap() {
    let mut env = TestRegistry::with_config(|c| c.with_id_lease_size(100));
    {
        let store = env.store("clean", EngineKind::Lsm);
        for expected in 1..=5 {
            assert_eq!(mint(&store), expected);
        }
    }
    env.reopen();
    assert_eq!(mint(&env.store("clean", EngineKind::Lsm)), 6);
}

/// Test: Threads racing on one store get disjoint IDs
#[test]
fn test_ids_unique_across_threads() {
    let env = TestRegistry::with_config(|c| c.with_id_lease_size(16));
    let store = env.store("race", EngineKind::Lsm);
    let threads = 8;
    let per_thread = 250;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_thread).map(|_| mint(&store)).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        let ids = handle.join().unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for id in ids {
            assert!(all.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(all.len(), threads * per_thread);
    // Clean run: no ID was skipped
    assert_eq!(all.iter().max().copied(), Some((threads * per_thread) as u64));
}

/// Test: Data writes interleaved with minting do not disturb the sequence
#[test]
fn test_ids_and_data_share_a_store() {
    let env = TestRegistry::new();
    let store = env.store("mixed", EngineKind::Lsm);
    for i in 1..=20u64 {
        let id = store.generate_id().unwrap();
        assert_eq!(id, i.to_string());
        store.set(id.as_bytes(), b"payload").unwrap();
    }
    assert_eq!(store.get(b"20").unwrap(), b"payload");
}
