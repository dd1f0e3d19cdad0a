// Wire framing, connection handling, worker pool, acceptor loop
pub mod transport;

// Chat and todo protocol state machines
pub mod protocol;

// Shared state stores
pub mod state;

// Configuration
pub mod config;

// Metrics, logging and the server runner
pub mod server;

// Client
pub mod client;

pub use config::{ServerArgs, ServerSettings, Variant};
pub use protocol::{ChatProtocol, CommandError, Protocol, Session, Step, TodoProtocol};
pub use server::metrics::Metrics;
pub use state::{AddOutcome, ChatHistory, TodoList};
pub use transport::{
    Backpressure, CloseReason, FrameCodec, FrameError, PoolConfig, PoolError, ShutdownCoordinator,
    TcpServer, TcpServerConfig, WorkerPool,
};
