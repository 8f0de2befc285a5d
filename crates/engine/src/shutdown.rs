//! Process shutdown
//!
//! The first termination signal starts a graceful shutdown: the caller's stop
//! hook runs and every open store is closed (pending writes flushed, ID
//! leases released) on a blocking thread. A second signal while that is in
//! progress exits immediately with `128 + signo`.
//!
//! [`ShutdownCoordinator`] holds the state machine and is usable on its own;
//! [`wait_for_signals`] wires it to SIGINT, SIGTERM and SIGQUIT under tokio.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use zinc_core::Result;

use crate::registry::StorageRegistry;

/// Termination signals the coordinator reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGQUIT: stop without draining in-flight requests
    Quit,
}

impl ShutdownSignal {
    /// POSIX signal number
    pub fn number(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 2,
            ShutdownSignal::Quit => 3,
            ShutdownSignal::Terminate => 15,
        }
    }

    /// Signal for a POSIX signal number
    pub fn from_number(signo: i32) -> Option<Self> {
        match signo {
            2 => Some(ShutdownSignal::Interrupt),
            3 => Some(ShutdownSignal::Quit),
            15 => Some(ShutdownSignal::Terminate),
            _ => None,
        }
    }
}

/// What the process should do in response to a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Stop serving and close all stores. `graceful` is false for SIGQUIT.
    Graceful {
        /// Whether in-flight requests may drain first
        graceful: bool,
    },
    /// Exit now with this status code
    ForceExit(i32),
}

/// Signal state machine plus the one-time store close
#[derive(Debug)]
pub struct ShutdownCoordinator {
    registry: Arc<StorageRegistry>,
    signals: AtomicUsize,
    closed: AtomicBool,
}

impl ShutdownCoordinator {
    /// Coordinator closing the stores of `registry`
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        ShutdownCoordinator {
            registry,
            signals: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Registry whose stores are closed at shutdown
    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    /// Record `signal` and decide what to do about it
    pub fn on_signal(&self, signal: ShutdownSignal) -> ShutdownAction {
        let seen = self.signals.fetch_add(1, Ordering::AcqRel);
        if seen == 0 {
            info!(target: "zinc::shutdown", ?signal, "Shutdown requested");
            ShutdownAction::Graceful {
                graceful: signal != ShutdownSignal::Quit,
            }
        } else {
            let code = 128 + signal.number();
            warn!(target: "zinc::shutdown", ?signal, code, "Repeated signal, forcing exit");
            ShutdownAction::ForceExit(code)
        }
    }

    /// Number of signals seen so far
    pub fn signals_received(&self) -> usize {
        self.signals.load(Ordering::Acquire)
    }

    /// Close every open store. Runs once; later calls return `Ok(())`.
    pub fn close_stores(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let stores = self.registry.len();
        let result = self.registry.close_all();
        match &result {
            Ok(()) => info!(target: "zinc::shutdown", stores, "All index stores closed"),
            Err(e) => warn!(target: "zinc::shutdown", stores, error = %e, "Shutdown finished with errors"),
        }
        result
    }

    /// Whether `close_stores` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(unix)]
mod signals {
    use std::io;

    use tokio::signal::unix::{signal, Signal, SignalKind};

    use super::ShutdownSignal;

    pub(super) struct SignalStreams {
        interrupt: Signal,
        terminate: Signal,
        quit: Signal,
    }

    impl SignalStreams {
        pub(super) fn install() -> io::Result<Self> {
            Ok(SignalStreams {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                quit: signal(SignalKind::quit())?,
            })
        }

        pub(super) async fn next(&mut self) -> ShutdownSignal {
            tokio::select! {
                _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
                _ = self.terminate.recv() => ShutdownSignal::Terminate,
                _ = self.quit.recv() => ShutdownSignal::Quit,
            }
        }
    }
}

/// Wait for a termination signal, then shut down.
///
/// On the first signal `on_stop` is called with the `graceful` flag and all
/// stores are closed on a blocking thread; the future resolves once that is
/// done. A second signal before then exits the process.
///
/// Must run inside a tokio runtime.
#[cfg(unix)]
pub async fn wait_for_signals<F>(coordinator: Arc<ShutdownCoordinator>, on_stop: F) -> Result<()>
where
    F: FnOnce(bool) + Send + 'static,
{
    let data_path = coordinator.registry().data_path().to_path_buf();
    let mut streams = signals::SignalStreams::install()
        .map_err(|e| zinc_core::StorageError::io("install signal handlers", &data_path, e))?;

    let first = streams.next().await;
    match coordinator.on_signal(first) {
        ShutdownAction::Graceful { graceful } => on_stop(graceful),
        ShutdownAction::ForceExit(code) => std::process::exit(code),
    }

    let closer = Arc::clone(&coordinator);
    let mut closing = tokio::task::spawn_blocking(move || closer.close_stores());
    loop {
        tokio::select! {
            joined = &mut closing => {
                return joined.map_err(|e| {
                    zinc_core::StorageError::io(
                        "close index stores",
                        &data_path,
                        std::io::Error::new(std::io::ErrorKind::Other, e),
                    )
                })?;
            }
            signal = streams.next() => {
                if let ShutdownAction::ForceExit(code) = coordinator.on_signal(signal) {
                    std::process::exit(code);
                }
            }
        }
    }
}
