//! Graceful shutdown utilities shared by every pipeline service.
//!
//! Each worker's fetch loop holds a [`ShutdownToken`]; the loop selects on it
//! alongside its next broker fetch so in-flight handlers get to finish (up to
//! `ack_wait`) before the process exits, per the cancellation rules of the
//! pipeline's concurrency model.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{broadcast, watch};

/// The signal that triggered a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// A manual, in-process shutdown request.
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Manual => write!(f, "Manual"),
        }
    }
}

/// A cheaply-cloneable handle that fetch loops poll for shutdown.
#[derive(Clone)]
pub struct ShutdownToken {
    receiver: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Returns true if shutdown has already been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&mut self) {
        let _ = self.receiver.wait_for(|v| *v).await;
    }
}

/// Coordinates graceful shutdown across a service's spawned tasks.
pub struct GracefulShutdown {
    timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl GracefulShutdown {
    /// Creates a handler with the default 30s drain timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Creates a handler with an explicit drain timeout (matched against
    /// each worker's `ack_wait`).
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            shutdown_tx: watch::channel(false).0,
            signal_tx: broadcast::channel(1).0,
        }
    }

    /// The configured drain timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Hands out a token that a fetch loop can select on.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
        }
    }

    /// Subscribes to the raw signal stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Triggers shutdown without waiting for an OS signal.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.signal_tx.send(ShutdownSignal::Manual);
    }

    /// Waits for SIGINT/SIGTERM and notifies every token/subscriber.
    pub async fn wait(&self) -> ShutdownSignal {
        let signal = wait_for_signal().await;
        let _ = self.shutdown_tx.send(true);
        let _ = self.signal_tx.send(signal);
        signal
    }

    /// Runs `future` to completion unless shutdown is requested first.
    pub async fn run_until_shutdown<F, T>(&self, future: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let mut token = self.token();
        tokio::select! {
            result = future => Some(result),
            _ = token.cancelled() => None,
        }
    }

    /// Spawns a named task that is cancelled when shutdown is requested.
    pub fn spawn<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<Option<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut token = self.token();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = future => Some(()),
                _ = token.cancelled() => {
                    tracing::info!(task = %name, "task cancelled due to shutdown");
                    None
                }
            }
        })
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => ShutdownSignal::Interrupt,
            _ = sigterm.recv() => ShutdownSignal::Terminate,
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to register Ctrl+C handler");
        ShutdownSignal::Interrupt
    }
}

/// Spawns and tracks named background tasks, logging their lifecycle and
/// tying them to a shared [`GracefulShutdown`].
#[derive(Clone)]
pub struct ShutdownAwareTaskSpawner {
    shutdown: Arc<GracefulShutdown>,
}

impl ShutdownAwareTaskSpawner {
    /// Creates a spawner bound to `shutdown`.
    pub fn new(shutdown: Arc<GracefulShutdown>) -> Self {
        Self { shutdown }
    }

    /// The underlying shutdown handler.
    pub fn shutdown(&self) -> &Arc<GracefulShutdown> {
        &self.shutdown
    }

    /// Spawns `future`, logging start/finish and cancelling it on shutdown.
    pub fn spawn<F, Fut>(&self, task_name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut token = self.shutdown.token();
        let task_name = task_name.to_string();

        tokio::spawn(async move {
            tracing::info!(task = %task_name, "starting task");
            tokio::select! {
                _ = future() => {
                    tracing::info!(task = %task_name, "task completed normally");
                }
                _ = token.cancelled() => {
                    tracing::info!(task = %task_name, "task cancelled due to shutdown");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::Manual.to_string(), "Manual");
    }

    #[tokio::test]
    async fn token_reflects_shutdown() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.token();

        assert!(!token.is_shutdown());
        shutdown.shutdown();
        assert!(token.is_shutdown());
    }

    #[tokio::test]
    async fn run_until_shutdown_returns_result_when_not_cancelled() {
        let shutdown = GracefulShutdown::new();
        let result = shutdown.run_until_shutdown(async { 42 }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn spawned_task_is_cancelled_on_shutdown() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let spawner = ShutdownAwareTaskSpawner::new(shutdown.clone());
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter_clone = counter.clone();

        let handle = spawner.spawn("long_task", move || async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            counter_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        shutdown.shutdown();
        handle.await.unwrap();

        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
