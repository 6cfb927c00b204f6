//! Graceful shutdown coordinator
//!
//! The server uses [`ShutdownCoordinator::wait_for_shutdown`] as its graceful
//! shutdown future, and every live subscription task holds a receiver from
//! [`ShutdownCoordinator::subscribe`] so tails end instead of pinning the server.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Graceful shutdown coordinator
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            shutdown_tx,
            timeout,
        }
    }

    /// Grace period granted to in-flight calls
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate graceful shutdown
    ///
    /// Returns immediately after broadcasting; callers bound the drain with
    /// [`ShutdownCoordinator::timeout`] and then call [`ShutdownCoordinator::complete`].
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return;
        }

        info!("Initiating graceful shutdown");
        *state = ShutdownState::ShuttingDown;
        drop(state);

        // no receivers just means nothing is listening yet
        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            warn!("Shutdown signalled with no listeners");
        }
    }

    /// Abandon the drain; waiters on [`ShutdownCoordinator::wait_for_immediate`] return
    pub async fn shutdown_immediately(&self) {
        warn!("Initiating immediate shutdown");

        let mut state = self.state.write().await;
        *state = ShutdownState::Shutdown;
        drop(state);

        if let Err(e) = self.shutdown_tx.send(ShutdownSignal::Immediate) {
            error!("Failed to send immediate shutdown signal: {}", e);
        }
    }

    /// Mark the drain as finished
    pub async fn complete(&self) {
        let mut state = self.state.write().await;
        *state = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    /// Check if shutdown is in progress
    pub async fn is_shutting_down(&self) -> bool {
        let state = self.state.read().await;
        *state != ShutdownState::Running
    }

    /// Get current state
    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    /// Wait for shutdown signal
    ///
    /// Resolves at once if shutdown has already begun.
    pub async fn wait_for_shutdown(&self) {
        // subscribe before reading state so a concurrent signal is not missed
        let mut rx = self.subscribe();
        if self.is_shutting_down().await {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Wait until the drain is abandoned
    ///
    /// Only signals sent after the call are seen.
    pub async fn wait_for_immediate(&self) {
        let mut rx = self.subscribe();
        loop {
            match rx.recv().await {
                Ok(ShutdownSignal::Immediate) => return,
                Ok(ShutdownSignal::Graceful) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

/// Install signal handlers for graceful shutdown
///
/// The first signal starts the drain, a second one abandons it.
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.shutdown().await;

        // a second signal skips the drain
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        coordinator.shutdown_immediately().await;
    });

    Ok(())
}

/// Install signal handlers for graceful shutdown (Windows)
#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        coordinator.shutdown().await;

        if tokio::signal::ctrl_c().await.is_ok() {
            coordinator.shutdown_immediately().await;
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));

        assert_eq!(coordinator.state().await, ShutdownState::Running);
        assert!(!coordinator.is_shutting_down().await);

        coordinator.shutdown().await;
        assert_eq!(coordinator.state().await, ShutdownState::ShuttingDown);

        coordinator.complete().await;
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }

    #[tokio::test]
    async fn test_subscribers_receive_signal() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        let mut rx = coordinator.subscribe();

        coordinator.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
    }

    #[tokio::test]
    async fn test_immediate_shutdown_wakes_drain_waiter() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(30)));
        coordinator.shutdown().await;

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_immediate().await })
        };
        tokio::task::yield_now().await;

        coordinator.shutdown_immediately().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("immediate shutdown should wake the drain waiter")
            .unwrap();
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_after_signal() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        coordinator.shutdown().await;

        // must not hang even though the broadcast already went out
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .expect("wait_for_shutdown should resolve once shut down");
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_wakes_waiter() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_millis(100)));

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_shutdown().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_shutdown_is_ignored() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        let mut rx = coordinator.subscribe();

        coordinator.shutdown().await;
        coordinator.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert!(rx.try_recv().is_err());
    }
}
