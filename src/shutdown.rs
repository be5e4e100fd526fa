//! Graceful shutdown handling for the coordinator.
//!
//! A [`ShutdownCoordinator`] is cloned into every long-running task (the HTTP
//! server, the replication processor, the periodic election and spot-check
//! loops). The [`SignalHandler`] flips it on SIGTERM/SIGINT, and the
//! [`ShutdownManager`] then waits for registered services in reverse order.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Maximum time to wait for graceful shutdown before force exit.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared shutdown flag.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_watch: watch::Receiver<bool>,
    shutdown_watch_tx: Arc<watch::Sender<bool>>,
    is_shutting_down: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_watch_tx, shutdown_watch) = watch::channel(false);

        Self {
            shutdown_watch,
            shutdown_watch_tx: Arc::new(shutdown_watch_tx),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown");
            let _ = self.shutdown_watch_tx.send(true);
        }
    }

    /// Wait for shutdown signal (for use in select! macros).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_watch.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns OS signals into a shutdown.
pub struct SignalHandler {
    coordinator: ShutdownCoordinator,
}

impl SignalHandler {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    /// Wait for SIGTERM or SIGINT, then shut down.
    #[cfg(unix)]
    pub async fn run(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        self.coordinator.shutdown();
    }

    #[cfg(windows)]
    pub async fn run(self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("Received Ctrl+C");
        self.coordinator.shutdown();
    }
}

/// A handle for a running service that can be gracefully shut down.
pub struct ServiceHandle {
    name: String,
    shutdown_fn: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl ServiceHandle {
    pub fn new<S, F>(name: S, shutdown_fn: F) -> Self
    where
        S: Into<String>,
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            shutdown_fn: Some(Box::pin(shutdown_fn)),
        }
    }

    /// Handle that waits for a spawned task to exit.
    pub fn task<S: Into<String>>(name: S, handle: tokio::task::JoinHandle<()>) -> Self {
        let name = name.into();
        let task_name = name.clone();
        Self::new(name, async move {
            if let Err(e) = handle.await {
                error!(service = %task_name, error = %e, "Service task panicked");
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn shutdown(&mut self) {
        if let Some(shutdown_fn) = self.shutdown_fn.take() {
            info!(service = %self.name, "Shutting down service");
            shutdown_fn.await;
        }
    }
}

/// Waits for shutdown, then stops registered services in reverse order.
pub struct ShutdownManager {
    coordinator: ShutdownCoordinator,
    services: Vec<ServiceHandle>,
}

impl ShutdownManager {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            services: Vec::new(),
        }
    }

    pub fn register(&mut self, handle: ServiceHandle) {
        info!(service = %handle.name(), "Registered service for managed shutdown");
        self.services.push(handle);
    }

    pub async fn run(mut self) {
        self.coordinator.wait_for_shutdown().await;

        info!("Shutdown initiated, stopping {} services", self.services.len());

        let timeout = self.coordinator.timeout();
        let shutdown_future = async {
            while let Some(mut service) = self.services.pop() {
                service.shutdown().await;
            }
        };

        if tokio::time::timeout(timeout, shutdown_future).await.is_err() {
            error!("Shutdown timed out after {:?}", timeout);
        } else {
            info!("All services shut down successfully");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutting_down());

        coordinator.shutdown();
        coordinator.shutdown();
        assert!(coordinator.is_shutting_down());

        let waited =
            tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown()).await;
        assert!(waited.is_ok());
    }

    #[tokio::test]
    async fn test_manager_waits_for_tasks() {
        let coordinator = ShutdownCoordinator::new();
        let mut manager = ShutdownManager::new(coordinator.clone());

        let task_coordinator = coordinator.clone();
        let handle = tokio::spawn(async move { task_coordinator.wait_for_shutdown().await });
        manager.register(ServiceHandle::task("loop", handle));

        coordinator.shutdown();
        let result = tokio::time::timeout(Duration::from_millis(500), manager.run()).await;
        assert!(result.is_ok());
    }
}
