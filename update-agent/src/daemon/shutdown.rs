//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! A signal cancels the session token: file tasks stop trying further
//! mirrors, partial temporaries are discarded, and the relay is torn down.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled once shutdown has been requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown without a signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    ///
    /// Returns early if shutdown was triggered some other way.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling update session...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling update session...");
            }
            _ = self.token.cancelled() => return,
        }

        self.token.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
