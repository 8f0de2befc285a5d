//! Signal Delivery Tests
//!
//! Sends real signals to the test process, so these run in their own binary
//! where no other test is listening for them.

#[path = "../common/mod.rs"]
mod common;

#[cfg(unix)]
mod sigterm {
    use std::process::Command;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::signal::unix::{signal, SignalKind};
    use tokio::sync::oneshot;
    use zincdb::ShutdownCoordinator;

    use crate::common::*;

    /// Test: SIGTERM stops gracefully and closes every store
    #[tokio::test]
    async fn test_sigterm_closes_stores() {
        // Keeps the default SIGTERM action (terminate) from ever applying
        let _guard = signal(SignalKind::terminate()).unwrap();

        let env = TestRegistry::new();
        let lsm = env.store("lsm", EngineKind::Lsm);
        let ordered = env.store("ordered", EngineKind::OrderedLog);
        lsm.set(b"k", b"v").unwrap();
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&env.registry)));

        let (stopped_tx, stopped_rx) = oneshot::channel();
        let waiter = tokio::spawn(zincdb::wait_for_signals(
            Arc::clone(&coordinator),
            move |graceful| {
                let _ = stopped_tx.send(graceful);
            },
        ));
        // Current-thread runtime: the waiter installs its handlers here
        tokio::task::yield_now().await;

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let graceful = tokio::time::timeout(Duration::from_secs(10), stopped_rx)
            .await
            .expect("on_stop not called")
            .unwrap();
        assert!(graceful);

        tokio::time::timeout(Duration::from_secs(10), waiter)
            .await
            .expect("waiter did not finish")
            .unwrap()
            .unwrap();
        assert_eq!(coordinator.signals_received(), 1);
        assert!(coordinator.is_closed());
        assert!(lsm.is_closed() && ordered.is_closed());
        assert!(env.registry.is_closed() && env.registry.is_empty());
    }
}
