//! Graceful shutdown coordination utilities.
//!
//! [`ShutdownCoordinator`] owns the root cancellation token of a run. Every
//! group download receives a child of it, so one Ctrl+C cancels all in-flight
//! work; tracks mid-write finish their current chunk and remove their part file.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Root token; cancelled when shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Idempotent.
    pub fn request_shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Request shutdown on the first Ctrl+C.
    pub fn install_ctrl_c_handler(self: &Arc<Self>) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - cancelling in-flight downloads...");
                shutdown.request_shutdown();
            }
        });
    }
}
