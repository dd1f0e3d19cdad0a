use crate::config::{ServerSettings, Variant};
use crate::protocol::{ChatProtocol, Protocol, TodoProtocol};
use crate::server::metrics::{self, Metrics};
use crate::state::{ChatHistory, TodoList};
use crate::transport::pool::DrainReport;
use crate::transport::shutdown::ShutdownCoordinator;
use crate::transport::tcp::{TcpServer, TcpServerConfig};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Run the configured server variant until `shutdown` is triggered
pub async fn run(settings: ServerSettings, shutdown: &ShutdownCoordinator) -> Result<DrainReport> {
    let metrics = Arc::new(Metrics::new());
    let config = TcpServerConfig::new(settings.listen.clone())
        .with_pool(settings.pool.clone())
        .with_idle_timeout(settings.idle_timeout)
        .with_grace(settings.grace)
        .with_metrics(metrics.clone());

    match settings.variant {
        Variant::Chat => {
            let history = Arc::new(ChatHistory::new(settings.history_capacity));
            let protocol = ChatProtocol::new(history).with_max_frame_len(settings.max_frame_len);
            serve(config, Arc::new(protocol), &settings, metrics, shutdown).await
        }
        Variant::Todo => {
            let todos = Arc::new(TodoList::new());
            let protocol = TodoProtocol::new(todos).with_max_frame_len(settings.max_frame_len);
            serve(config, Arc::new(protocol), &settings, metrics, shutdown).await
        }
    }
}

async fn serve<P: Protocol>(
    config: TcpServerConfig,
    protocol: Arc<P>,
    settings: &ServerSettings,
    metrics: Arc<Metrics>,
    shutdown: &ShutdownCoordinator,
) -> Result<DrainReport> {
    let server = TcpServer::bind(config, protocol).await?;
    let local = server.local_addr()?;
    metrics::log_startup(&local.to_string(), settings.variant.name());

    #[cfg(feature = "http")]
    let admin = match settings.admin {
        Some(ref addr) => {
            let (_, handle) = crate::transport::metrics_endpoint::spawn_admin(
                addr,
                metrics.clone(),
                shutdown.subscribe(),
            )
            .await?;
            Some(handle)
        }
        None => None,
    };
    #[cfg(not(feature = "http"))]
    if settings.admin.is_some() {
        tracing::warn!("Admin endpoint requested but the http feature is disabled");
    }

    let reporter = metrics::spawn_reporter(metrics, METRICS_REPORT_INTERVAL);
    let report = server.run(shutdown.subscribe()).await;
    reporter.abort();
    // Releases the admin endpoint if the acceptor stopped on its own.
    shutdown.shutdown();

    #[cfg(feature = "http")]
    if let Some(admin) = admin {
        let _ = admin.await;
    }

    metrics::log_shutdown();
    report
}
