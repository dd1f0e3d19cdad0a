use crate::protocol::{Phase, Protocol, Session, Step};
use crate::server::metrics::Metrics;
use crate::transport::framing::{FrameCodec, FrameError};
use crate::transport::shutdown::ShutdownListener;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Idle timeout applied to reads and writes unless configured otherwise.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Active(Phase),
    Closed,
}

/// Why a connection handler exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the stream between frames
    PeerClosed,
    ProtocolViolation { len: i64, max: usize },
    UnexpectedEndOfStream,
    IdleTimeout,
    /// Server shutdown reached this connection
    Cancelled,
    /// The protocol ended the session
    SessionEnded,
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed connection"),
            CloseReason::ProtocolViolation { len, max } => {
                write!(f, "invalid message length {} (max {})", len, max)
            }
            CloseReason::UnexpectedEndOfStream => write!(f, "client disconnected abruptly"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Cancelled => write!(f, "cancelled by shutdown"),
            CloseReason::SessionEnded => write!(f, "session ended"),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl From<FrameError> for CloseReason {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::ProtocolViolation { len, max } => {
                CloseReason::ProtocolViolation { len, max }
            }
            FrameError::UnexpectedEndOfStream => CloseReason::UnexpectedEndOfStream,
            other => CloseReason::Transport(other.to_string()),
        }
    }
}

/// Per-connection settings shared by every handler of a server
#[derive(Clone)]
pub struct HandlerContext {
    pub idle_timeout: Duration,
    pub metrics: Arc<Metrics>,
    pub cancel: ShutdownListener,
}

/// Identity and lifecycle of one accepted connection
///
/// Dropping it records the close, so the bookkeeping runs on every exit path
/// including panics and task aborts.
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub username: Option<String>,
    state: ConnState,
    metrics: Arc<Metrics>,
}

impl Connection {
    pub fn new(peer: SocketAddr, metrics: Arc<Metrics>) -> Self {
        metrics.record_opened();
        Self {
            id: Uuid::new_v4(),
            peer,
            username: None,
            state: ConnState::Connecting,
            metrics,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    fn set_state(&mut self, state: ConnState) {
        if self.state != state {
            debug!(conn_id = %self.id, peer = %self.peer, "{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.state = ConnState::Closed;
        self.metrics.record_closed();
    }
}

/// Serve one accepted TCP connection to completion
pub async fn handle_connection<P: Protocol>(
    protocol: Arc<P>,
    stream: TcpStream,
    peer: SocketAddr,
    ctx: HandlerContext,
) -> CloseReason {
    let (reader, writer) = stream.into_split();
    serve(protocol, reader, writer, peer, ctx).await
}

/// Drive a session over any split stream
///
/// The halves are owned here and dropped on return, which closes the socket.
pub async fn serve<P, R, W>(
    protocol: Arc<P>,
    mut reader: R,
    mut writer: W,
    peer: SocketAddr,
    ctx: HandlerContext,
) -> CloseReason
where
    P: Protocol,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut conn = Connection::new(peer, ctx.metrics.clone());
    info!(conn_id = %conn.id, peer = %peer, protocol = protocol.name(), "Client connected");

    let codec = FrameCodec::new(protocol.max_frame_len());
    let mut session = protocol.open(peer);
    let mut cancel = ctx.cancel.clone();

    let reason = run_session(
        &mut conn,
        &codec,
        &mut session,
        &mut reader,
        &mut writer,
        &ctx,
        &mut cancel,
    )
    .await;

    match &reason {
        CloseReason::PeerClosed | CloseReason::SessionEnded | CloseReason::Cancelled => {
            let user = conn.username.as_deref();
            info!(conn_id = %conn.id, peer = %peer, user, "Connection closed: {}", reason)
        }
        CloseReason::ProtocolViolation { .. } => {
            ctx.metrics.record_protocol_violation();
            warn!(conn_id = %conn.id, peer = %peer, "Connection closed: {}", reason)
        }
        CloseReason::IdleTimeout => {
            ctx.metrics.record_idle_timeout();
            info!(conn_id = %conn.id, peer = %peer, "Connection closed: {}", reason)
        }
        CloseReason::UnexpectedEndOfStream | CloseReason::Transport(_) => {
            warn!(conn_id = %conn.id, peer = %peer, "Connection closed: {}", reason)
        }
    }
    reason
}

async fn run_session<S, R, W>(
    conn: &mut Connection,
    codec: &FrameCodec,
    session: &mut S,
    reader: &mut R,
    writer: &mut W,
    ctx: &HandlerContext,
    cancel: &mut ShutdownListener,
) -> CloseReason
where
    S: Session,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    conn.set_state(ConnState::Active(session.phase()));

    let greeting = session.greeting().await;
    if let Err(reason) = send_all(codec, writer, &greeting, ctx, cancel).await {
        return reason;
    }

    loop {
        let frame = tokio::select! {
            read = tokio::time::timeout(ctx.idle_timeout, codec.read_frame(reader)) => match read {
                Err(_) => return CloseReason::IdleTimeout,
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => return CloseReason::PeerClosed,
                Ok(Err(e)) => return e.into(),
            },
            _ = cancel.recv() => return CloseReason::Cancelled,
        };
        ctx.metrics.record_frame_in();

        let step = session.on_frame(frame).await;
        if conn.username.is_none() {
            conn.username = session.identity().map(str::to_string);
        }
        conn.set_state(ConnState::Active(session.phase()));

        match step {
            Step::Reply(replies) => {
                if let Err(reason) = send_all(codec, writer, &replies, ctx, cancel).await {
                    return reason;
                }
            }
            Step::Invalid { error, replies } => {
                ctx.metrics.record_command_error();
                warn!(conn_id = %conn.id, peer = %conn.peer, "{}", error);
                let mut frames = Vec::with_capacity(replies.len() + 1);
                frames.push(error.to_string());
                frames.extend(replies);
                if let Err(reason) = send_all(codec, writer, &frames, ctx, cancel).await {
                    return reason;
                }
            }
            Step::Close(replies) => {
                return match send_all(codec, writer, &replies, ctx, cancel).await {
                    Ok(()) => CloseReason::SessionEnded,
                    Err(reason) => reason,
                };
            }
        }
    }
}

async fn send_all<W>(
    codec: &FrameCodec,
    writer: &mut W,
    frames: &[String],
    ctx: &HandlerContext,
    cancel: &mut ShutdownListener,
) -> Result<(), CloseReason>
where
    W: AsyncWrite + Unpin + Send,
{
    for frame in frames {
        tokio::select! {
            written = tokio::time::timeout(ctx.idle_timeout, codec.write_frame(writer, frame)) => {
                match written {
                    Err(_) => return Err(CloseReason::IdleTimeout),
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok(())) => ctx.metrics.record_frame_out(),
                }
            }
            _ = cancel.recv() => return Err(CloseReason::Cancelled),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatProtocol, TodoProtocol};
    use crate::state::{ChatHistory, TodoList};
    use crate::transport::shutdown::ShutdownCoordinator;
    use tokio::io::{AsyncWriteExt, duplex};

    fn peer() -> SocketAddr {
        "127.0.0.1:45000".parse().unwrap()
    }

    fn ctx(idle: Duration, coordinator: &ShutdownCoordinator) -> HandlerContext {
        HandlerContext {
            idle_timeout: idle,
            metrics: Arc::new(Metrics::new()),
            cancel: coordinator.subscribe(),
        }
    }

    #[tokio::test]
    async fn test_bad_length_closes_connection() {
        let coordinator = ShutdownCoordinator::new();
        let ctx = ctx(Duration::from_secs(5), &coordinator);
        let metrics = ctx.metrics.clone();
        let protocol = Arc::new(ChatProtocol::new(Arc::new(ChatHistory::new(10))));

        let (client, server) = duplex(1024);
        let (server_r, server_w) = tokio::io::split(server);
        let (_client_r, mut client_w) = tokio::io::split(client);
        client_w.write_all(&10_001i32.to_be_bytes()).await.unwrap();

        let reason = serve(protocol, server_r, server_w, peer(), ctx).await;
        assert_eq!(reason, CloseReason::ProtocolViolation { len: 10_001, max: 10_000 });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.protocol_violations, 1);
        assert_eq!(snapshot.connections_active, 0);
        assert_eq!(snapshot.connections_closed, 1);
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let coordinator = ShutdownCoordinator::new();
        let ctx = ctx(Duration::from_millis(50), &coordinator);
        let protocol = Arc::new(TodoProtocol::new(Arc::new(TodoList::new())));

        let (client, server) = duplex(1024);
        let (server_r, server_w) = tokio::io::split(server);
        let reason = serve(protocol, server_r, server_w, peer(), ctx).await;
        assert_eq!(reason, CloseReason::IdleTimeout);
        drop(client);
    }

    #[tokio::test]
    async fn test_cancellation_ends_session() {
        let coordinator = ShutdownCoordinator::new();
        let ctx = ctx(Duration::from_secs(30), &coordinator);
        let protocol = Arc::new(ChatProtocol::new(Arc::new(ChatHistory::new(10))));

        let (_client, server) = duplex(1024);
        let (server_r, server_w) = tokio::io::split(server);
        let handle = tokio::spawn(serve(protocol, server_r, server_w, peer(), ctx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.shutdown();
        assert_eq!(handle.await.unwrap(), CloseReason::Cancelled);
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let coordinator = ShutdownCoordinator::new();
        let ctx = ctx(Duration::from_secs(5), &coordinator);
        let protocol = Arc::new(ChatProtocol::new(Arc::new(ChatHistory::new(10))));

        let (client, server) = duplex(1024);
        let (server_r, server_w) = tokio::io::split(server);
        drop(client);

        let reason = serve(protocol, server_r, server_w, peer(), ctx).await;
        assert_eq!(reason, CloseReason::PeerClosed);
    }

    /// Echoes every frame until "bye"
    struct Farewell;

    struct FarewellSession;

    impl Session for FarewellSession {
        async fn greeting(&mut self) -> Vec<String> {
            Vec::new()
        }

        async fn on_frame(&mut self, frame: String) -> Step {
            if frame == "bye" {
                Step::Close(vec!["goodbye".to_string()])
            } else {
                Step::Reply(vec![frame])
            }
        }

        fn phase(&self) -> Phase {
            Phase::Steady
        }
    }

    impl Protocol for Farewell {
        type Session = FarewellSession;

        fn name(&self) -> &'static str {
            "farewell"
        }

        fn max_frame_len(&self) -> usize {
            64
        }

        fn open(&self, _peer: SocketAddr) -> FarewellSession {
            FarewellSession
        }
    }

    #[tokio::test]
    async fn test_session_close_sends_final_frames() {
        let coordinator = ShutdownCoordinator::new();
        let ctx = ctx(Duration::from_secs(5), &coordinator);
        let metrics = ctx.metrics.clone();

        let (client, server) = duplex(1024);
        let (server_r, server_w) = tokio::io::split(server);
        let (mut client_r, mut client_w) = tokio::io::split(client);
        let codec = FrameCodec::new(64);
        codec.write_frame(&mut client_w, "ping").await.unwrap();
        codec.write_frame(&mut client_w, "bye").await.unwrap();

        let reason = serve(Arc::new(Farewell), server_r, server_w, peer(), ctx).await;
        assert_eq!(reason, CloseReason::SessionEnded);

        assert_eq!(codec.read_frame(&mut client_r).await.unwrap().as_deref(), Some("ping"));
        assert_eq!(codec.read_frame(&mut client_r).await.unwrap().as_deref(), Some("goodbye"));
        assert!(codec.read_frame(&mut client_r).await.unwrap().is_none());
        assert_eq!(metrics.snapshot().frames_out, 2);
    }

    #[tokio::test]
    async fn test_session_close_reports_failed_farewell() {
        let coordinator = ShutdownCoordinator::new();
        let ctx = ctx(Duration::from_secs(5), &coordinator);

        let (client, server) = duplex(1024);
        let (server_r, server_w) = tokio::io::split(server);
        let (client_r, mut client_w) = tokio::io::split(client);
        FrameCodec::new(64).write_frame(&mut client_w, "bye").await.unwrap();
        drop(client_r);
        drop(client_w);

        let reason = serve(Arc::new(Farewell), server_r, server_w, peer(), ctx).await;
        assert!(matches!(reason, CloseReason::Transport(_)));
    }

    #[test]
    fn test_connection_drop_records_close() {
        let metrics = Arc::new(Metrics::new());
        let conn = Connection::new(peer(), metrics.clone());
        assert_eq!(conn.state(), ConnState::Connecting);
        drop(conn);
        assert_eq!(metrics.snapshot().connections_closed, 1);
    }
}
