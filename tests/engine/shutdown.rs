//! Shutdown Tests
//!
//! First signal closes every store once (flushing writes and releasing ID
//! leases); a repeated signal asks for an immediate exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zincdb::{ShutdownAction, ShutdownCoordinator, ShutdownSignal};

use crate::common::*;

/// Test: Graceful shutdown closes every store and releases ID leases
#[test]
fn test_graceful_shutdown_closes_all_stores() {
    let mut env = TestRegistry::with_config(|c| c.with_id_lease_size(50));
    let coordinator = ShutdownCoordinator::new(Arc::clone(&env.registry));
    let lsm = env.store("lsm", EngineKind::Lsm);
    let ordered = env.store("ordered", EngineKind::OrderedLog);
    assert_eq!(lsm.generate_id().unwrap(), "1");
    ordered.set(b"k", b"v").unwrap();

    assert_eq!(
        coordinator.on_signal(ShutdownSignal::Terminate),
        ShutdownAction::Graceful { graceful: true }
    );
    coordinator.close_stores().unwrap();
    assert!(lsm.is_closed() && ordered.is_closed());
    assert!(matches!(
        env.registry.resolve_default("late"),
        Err(StorageError::RegistryClosed)
    ));

    drop((lsm, ordered));
    env.crash();
    // The lease was released at shutdown, so IDs continue without a gap
    assert_eq!(env.store("lsm", EngineKind::Lsm).generate_id().unwrap(), "2");
    assert_eq!(
        env.store("ordered", EngineKind::OrderedLog).get(b"k").unwrap(),
        b"v"
    );
}

/// Test: Second signal forces exit with 128 + signo
#[test]
fn test_second_signal_forces_exit() {
    let env = TestRegistry::new();
    let coordinator = ShutdownCoordinator::new(Arc::clone(&env.registry));
    assert_eq!(
        coordinator.on_signal(ShutdownSignal::Interrupt),
        ShutdownAction::Graceful { graceful: true }
    );
    assert_eq!(
        coordinator.on_signal(ShutdownSignal::Interrupt),
        ShutdownAction::ForceExit(130)
    );
    assert_eq!(
        coordinator.on_signal(ShutdownSignal::Terminate),
        ShutdownAction::ForceExit(143)
    );
}

/// Test: close_stores is safe to call from several threads at once
#[test]
fn test_close_stores_concurrently() {
    let env = TestRegistry::new();
    for i in 0..4 {
        env.store(&format!("idx-{i}"), ENGINE_KINDS[i % 2]);
    }
    let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&env.registry)));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || coordinator.close_stores())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert!(env.registry.is_empty());
    assert!(coordinator.is_closed());
}

/// Test: Without a signal the waiter stays pending and closes nothing
#[cfg(unix)]
#[tokio::test]
async fn test_waiter_pending_without_signal() {
    let env = TestRegistry::new();
    let store = env.store("waiting", EngineKind::Lsm);
    let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&env.registry)));
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stopped);

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        zincdb::wait_for_signals(coordinator, move |_| flag.store(true, Ordering::SeqCst)),
    )
    .await;

    assert!(waited.is_err(), "waiter resolved without a signal");
    assert!(!stopped.load(Ordering::SeqCst));
    assert!(!store.is_closed());
}
