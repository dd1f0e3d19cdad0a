use crate::protocol::Protocol;
use crate::server::metrics::Metrics;
use crate::transport::connection::{DEFAULT_IDLE_TIMEOUT, HandlerContext, handle_connection};
use crate::transport::pool::{DrainReport, PoolConfig, PoolError, WorkerPool};
use crate::transport::shutdown::ShutdownListener;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

pub struct TcpServerConfig {
    pub addr: String,
    pub pool: PoolConfig,
    pub idle_timeout: Duration,
    /// How long in-flight handlers may keep running after shutdown starts
    pub grace: Duration,
    /// How long cancelled handlers get to exit before being aborted
    pub force_window: Duration,
    pub metrics: Arc<Metrics>,
}

impl TcpServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            pool: PoolConfig::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            grace: Duration::from_secs(60),
            force_window: Duration::from_secs(5),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_force_window(mut self, force_window: Duration) -> Self {
        self.force_window = force_window;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Acceptor loop feeding a bounded worker pool
pub struct TcpServer<P: Protocol> {
    listener: TcpListener,
    protocol: Arc<P>,
    pool: WorkerPool,
    config: TcpServerConfig,
}

impl<P: Protocol> TcpServer<P> {
    /// Bind the listening socket; failure here is fatal for the process
    pub async fn bind(config: TcpServerConfig, protocol: Arc<P>) -> Result<Self> {
        let pool = WorkerPool::new(config.pool.clone())?;
        let listener = TcpListener::bind(&config.addr)
            .await
            .with_context(|| format!("failed to bind {}", config.addr))?;
        info!(
            "{} server listening on {}",
            protocol.name(),
            listener.local_addr()?
        );

        Ok(Self {
            listener,
            protocol,
            pool,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.config.metrics.clone()
    }

    /// Accept connections until `shutdown` fires, then drain the pool
    pub async fn run(self, mut shutdown: ShutdownListener) -> Result<DrainReport> {
        let TcpServer {
            listener,
            protocol,
            pool,
            config,
        } = self;

        let ctx = HandlerContext {
            idle_timeout: config.idle_timeout,
            metrics: config.metrics.clone(),
            cancel: pool.cancellation(),
        };

        // Blocked admission must still see the shutdown signal.
        let mut admission_stop = shutdown.clone();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((socket, peer)) => {
                            if let Err(e) = socket.set_nodelay(true) {
                                debug!(peer = %peer, "Failed to set TCP_NODELAY: {}", e);
                            }

                            let protocol = protocol.clone();
                            let ctx = ctx.clone();
                            let job = async move {
                                handle_connection(protocol, socket, peer, ctx).await;
                            };
                            match pool.submit_until(job, &mut admission_stop).await {
                                Ok(()) => config.metrics.record_accepted(),
                                Err(PoolError::Saturated) => {
                                    config.metrics.record_rejected();
                                    warn!(
                                        peer = %peer,
                                        "Rejecting connection: worker pool saturated"
                                    );
                                }
                                Err(PoolError::Closed) if admission_stop.is_shutdown() => {
                                    info!(
                                        peer = %peer,
                                        "Dropping pending connection: shutting down"
                                    );
                                    break;
                                }
                                Err(e) => {
                                    error!(peer = %peer, "Failed to dispatch connection: {}", e);
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {:?}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down {} server", protocol.name());
                    break;
                }
            }
        }

        // Stop accepting before draining.
        drop(listener);

        let report = pool.shutdown(config.grace, config.force_window).await;
        if report.drained {
            info!("All connections drained");
        } else {
            warn!(
                cancelled = report.cancelled,
                aborted = report.aborted,
                "Forced shutdown of remaining connections"
            );
        }
        Ok(report)
    }
}
