pub mod connection;
pub mod framing;
pub mod pool;
pub mod shutdown;
pub mod tcp;

#[cfg(feature = "http")]
pub mod metrics_endpoint;

pub use connection::{CloseReason, ConnState, Connection, HandlerContext, handle_connection};
pub use framing::{FrameCodec, FrameError};
pub use pool::{Backpressure, DrainReport, PoolConfig, PoolError, WorkerPool};
pub use shutdown::{ShutdownCoordinator, ShutdownListener};
pub use tcp::{TcpServer, TcpServerConfig};
