//! Interrupting a run at a committed page
//!
//! The binary turns SIGINT (Ctrl+C) and SIGTERM into a stop request on one
//! [`ShutdownCoordinator`]. The collector polls it before every page and
//! races its rate-limiter, fetch and backoff waits against it. Once a stop is
//! seen the run returns `Interrupted`, the active batch is closed into the
//! manifest with status `interrupted` and the checkpoint stays on the last
//! committed page.

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Shared stop handle.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static PROCESS_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Install the handle the signal listener triggers; collectors built
/// afterwards pick it up by default. Only the first call has an effect.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = PROCESS_SHUTDOWN.set(handle);
}

/// Handle installed by [`set_global_shutdown`].
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    PROCESS_SHUTDOWN.get().cloned()
}

/// What asked the run to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT / Ctrl+C from an operator
    CtrlC,
    /// SIGTERM from a scheduler or deployment timeout
    Terminate,
    /// Requested in-process
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::CtrlC => "ctrl-c",
            StopReason::Terminate => "sigterm",
            StopReason::Requested => "requested",
        })
    }
}

/// Stop flag plus wakeup for tasks parked in a wait.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    stopped: AtomicBool,
    reason: OnceCell<StopReason>,
    wakeup: Notify,
}

impl ShutdownCoordinator {
    /// Coordinator with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// New coordinator behind an [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Ask the run to stop for `reason`. The first reason wins.
    pub fn request(&self, reason: StopReason) {
        let _ = self.reason.set(reason);
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.wakeup.notify_waiters();
        }
    }

    /// Ask the run to stop from inside the process.
    pub fn request_shutdown(&self) {
        self.request(StopReason::Requested);
    }

    /// Whether a stop was requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Why the run is stopping, once it is.
    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Resolves once a stop is requested (immediately if it already was).
    pub async fn wait_for_shutdown(&self) {
        let notified = self.wakeup.notified();
        tokio::pin!(notified);
        // Register before reading the flag so a concurrent request is not missed
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Wait for the first SIGINT or SIGTERM
///
/// SIGTERM is only observed on unix; elsewhere only Ctrl+C is.
pub async fn wait_for_signal() -> std::io::Result<StopReason> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| StopReason::CtrlC),
            _ = terminate.recv() => Ok(StopReason::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| StopReason::CtrlC)
    }
}

/// Forward the first SIGINT or SIGTERM to `shutdown` from a background task
pub fn spawn_signal_listener(shutdown: SharedShutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(reason) => {
                warn!(%reason, "Stop signal received - finishing at the last committed page");
                shutdown.request(reason);
            }
            Err(e) => warn!(error = %e, "Failed to install signal handlers"),
        }
    })
}
