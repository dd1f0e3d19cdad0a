use super::{Phase, Protocol, Session, Step};
use crate::state::ChatHistory;
use crate::transport::framing::CHAT_MAX_MESSAGE_LEN;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const INTRO_SUFFIX: &str = ", has entered the chat.";
pub const HISTORY_HEADER: &str = "Recent Chat History:\n";

/// Chat room: one intro frame, one history reply, then push-only ingestion
pub struct ChatProtocol {
    history: Arc<ChatHistory>,
    max_frame_len: usize,
}

impl ChatProtocol {
    pub fn new(history: Arc<ChatHistory>) -> Self {
        Self {
            history,
            max_frame_len: CHAT_MAX_MESSAGE_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn history(&self) -> &Arc<ChatHistory> {
        &self.history
    }
}

impl Protocol for ChatProtocol {
    type Session = ChatSession;

    fn name(&self) -> &'static str {
        "chat"
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn open(&self, peer: SocketAddr) -> ChatSession {
        ChatSession {
            history: self.history.clone(),
            peer,
            username: None,
            phase: Phase::Handshaking,
        }
    }
}

pub struct ChatSession {
    history: Arc<ChatHistory>,
    peer: SocketAddr,
    username: Option<String>,
    phase: Phase,
}

/// Pull the username out of `"<username>, has entered the chat."`
///
/// Falls back to the whole trimmed intro when the suffix is missing.
pub fn parse_intro(intro: &str) -> String {
    let intro = intro.trim();
    intro
        .strip_suffix(INTRO_SUFFIX)
        .unwrap_or(intro)
        .trim()
        .to_string()
}

impl Session for ChatSession {
    async fn greeting(&mut self) -> Vec<String> {
        Vec::new()
    }

    async fn on_frame(&mut self, frame: String) -> Step {
        match self.phase {
            Phase::Handshaking => {
                let username = parse_intro(&frame);
                info!(peer = %self.peer, user = %username, "{}", frame);
                self.username = Some(username);
                self.phase = Phase::Steady;

                let mut reply = String::from(HISTORY_HEADER);
                reply.push_str(&self.history.render().await);
                Step::Reply(vec![reply])
            }
            Phase::Steady => {
                info!(
                    peer = %self.peer,
                    user = self.username.as_deref().unwrap_or("?"),
                    "{}",
                    frame
                );
                self.history.append(frame).await;
                Step::Reply(Vec::new())
            }
        }
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn identity(&self) -> Option<&str> {
        self.username.as_deref()
    }
}
