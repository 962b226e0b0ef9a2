//! Shutdown signalling.
//!
//! The original tracked signal state in a global `Flags` bitfield set
//! from a SIGINT/SIGTERM handler and polled between `alarm`-bounded
//! blocking calls. Here an `Arc<AtomicBool>` is flipped by a task
//! listening on `tokio::signal::ctrl_c` (and SIGTERM on unix), and every
//! loop that used to check `Flags & SHUTDOWN_FLAG` instead checks this
//! flag or races it against its next operation with `tokio::select!`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared shutdown flag, cloned into every task that needs to observe
/// a requested graceful shutdown.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Spawn a task that sets this flag on Ctrl-C or SIGTERM and
    /// resolves once it has done so. Await the returned handle if the
    /// caller wants to block on shutdown rather than poll `is_set`.
    pub fn spawn_listener(&self) -> tokio::task::JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut term =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("installing SIGTERM handler");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            flag.set();
        })
    }
}
