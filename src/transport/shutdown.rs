use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Graceful shutdown coordinator
///
/// Backed by a `watch` channel so that listeners subscribed after the
/// trigger still observe it.
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
}

/// Receiving side of a [`ShutdownCoordinator`]
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait for OS shutdown signals (CTRL+C, SIGTERM), then trigger shutdown
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        {
            use signal::unix::{SignalKind, signal};

            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM");
                        }
                        _ = sigint.recv() => {
                            info!("Received SIGINT (CTRL+C)");
                        }
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Failed to register signal handlers: {}", e);
                    return;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for CTRL+C: {}", e);
                return;
            }
            info!("Received CTRL+C");
        }

        info!("Initiating graceful shutdown...");
        self.shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownListener {
    /// Completes once shutdown has been triggered, or the coordinator is gone
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Runs `work` for at most `timeout`
///
/// Returns `true` when the work finished in time.
pub async fn run_with_timeout<F>(work: F, timeout: Duration) -> bool
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(_) => true,
        Err(_) => {
            warn!("Timed out after {:?}", timeout);
            false
        }
    }
}
