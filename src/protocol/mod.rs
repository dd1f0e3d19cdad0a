//! Per-variant protocol state machines.
//!
//! A [`Protocol`] is the process-wide factory holding the shared state; a
//! [`Session`] is the per-connection state machine it opens. The connection
//! handler owns the socket and only ever hands decoded text to the session.

pub mod chat;
pub mod todo;

use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;

pub use chat::{ChatProtocol, ChatSession};
pub use todo::{TodoProtocol, TodoSession};

/// Malformed input inside an otherwise well-framed message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Invalid option '{0}'. Please choose 1, 2 or 3.")]
    InvalidChoice(String),

    #[error("Invalid index '{0}'. Please enter a number from the listing.")]
    InvalidIndex(String),
}

/// What the handler should do after a frame has been processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send these frames (possibly none) and keep reading
    Reply(Vec<String>),
    /// The input was rejected; send the error, then these frames, and keep reading
    Invalid {
        error: CommandError,
        replies: Vec<String>,
    },
    /// Send these frames, then end the session
    Close(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshaking,
    Steady,
}

pub trait Session: Send + 'static {
    /// Frames sent as soon as the connection is established
    fn greeting(&mut self) -> impl Future<Output = Vec<String>> + Send;

    fn on_frame(&mut self, frame: String) -> impl Future<Output = Step> + Send;

    fn phase(&self) -> Phase;

    /// Per-connection identity, once the peer has introduced itself
    fn identity(&self) -> Option<&str> {
        None
    }
}

pub trait Protocol: Send + Sync + 'static {
    type Session: Session;

    fn name(&self) -> &'static str;

    fn max_frame_len(&self) -> usize;

    fn open(&self, peer: SocketAddr) -> Self::Session;
}
