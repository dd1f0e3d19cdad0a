use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Connection and frame counters for a running server
#[derive(Debug, Default)]
pub struct Metrics {
    /// Connections accepted and handed to the pool
    connections_accepted: AtomicU64,
    /// Connections refused because the pool was saturated
    connections_rejected: AtomicU64,
    /// Handlers currently running
    connections_active: AtomicU64,
    /// Handlers that have exited, for any reason
    connections_closed: AtomicU64,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    protocol_violations: AtomicU64,
    idle_timeouts: AtomicU64,
    command_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_out(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_error(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            command_errors: self.command_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_active: u64,
    pub connections_closed: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub protocol_violations: u64,
    pub idle_timeouts: u64,
    pub command_errors: u64,
}

/// Spawn a task that logs a metrics snapshot every `interval`
pub fn spawn_reporter(metrics: Arc<Metrics>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match serde_json::to_string(&metrics.snapshot()) {
                Ok(json) => info!(metrics = %json, "Metrics Report"),
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            }
        }
    })
}

/// Initialize logging with tracing
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_logging(default_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("framed_rooms={},tower_http={}", default_level, default_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Log server startup
pub fn log_startup(addr: &str, variant: &str) {
    info!("╔══════════════════════════════════════╗");
    info!("║      framed-rooms Server Started     ║");
    info!("╚══════════════════════════════════════╝");
    info!("Variant: {}", variant);
    info!("Address: {}", addr);
    info!("Ready to accept connections");
}

/// Log server shutdown
pub fn log_shutdown() {
    info!("╔══════════════════════════════════════╗");
    info!("║    framed-rooms Server Shutting Down ║");
    info!("╚══════════════════════════════════════╝");
}
