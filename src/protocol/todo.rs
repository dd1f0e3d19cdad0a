use super::{CommandError, Phase, Protocol, Session, Step};
use crate::state::{AddOutcome, TodoList};
use crate::transport::framing::TODO_MAX_MESSAGE_LEN;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

pub const MENU: &str =
    "What would you like to do:\n1. Print all todos\n2. Add a todo\n3. Remove a todo";
pub const ADD_PROMPT: &str = "Please enter the todo to add.";
pub const REMOVE_PROMPT: &str = "Please enter the index to delete:\n";

/// Menu-driven shared todo list
pub struct TodoProtocol {
    todos: Arc<TodoList>,
    max_frame_len: usize,
}

impl TodoProtocol {
    pub fn new(todos: Arc<TodoList>) -> Self {
        Self {
            todos,
            max_frame_len: TODO_MAX_MESSAGE_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn todos(&self) -> &Arc<TodoList> {
        &self.todos
    }
}

impl Protocol for TodoProtocol {
    type Session = TodoSession;

    fn name(&self) -> &'static str {
        "todo"
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn open(&self, peer: SocketAddr) -> TodoSession {
        TodoSession {
            todos: self.todos.clone(),
            peer,
            state: MenuState::AwaitChoice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    AwaitChoice,
    AwaitTodoText,
    AwaitIndex,
}

pub struct TodoSession {
    todos: Arc<TodoList>,
    peer: SocketAddr,
    state: MenuState,
}

impl TodoSession {
    pub fn state(&self) -> MenuState {
        self.state
    }

    async fn on_choice(&mut self, choice: &str) -> Step {
        match choice.trim() {
            "1" => Step::Reply(vec![self.todos.render().await, MENU.to_string()]),
            "2" => {
                self.state = MenuState::AwaitTodoText;
                Step::Reply(vec![ADD_PROMPT.to_string()])
            }
            "3" => {
                self.state = MenuState::AwaitIndex;
                let mut prompt = String::from(REMOVE_PROMPT);
                prompt.push_str(&self.todos.render().await);
                Step::Reply(vec![prompt])
            }
            other => Step::Invalid {
                error: CommandError::InvalidChoice(other.to_string()),
                replies: vec![MENU.to_string()],
            },
        }
    }

    async fn on_todo_text(&mut self, text: String) -> Step {
        self.state = MenuState::AwaitChoice;
        match self.todos.add(text.clone()).await {
            AddOutcome::Added => {
                info!(peer = %self.peer, "{} has been added to the todo list.", text)
            }
            AddOutcome::AlreadyPresent => {
                info!(peer = %self.peer, "{} is already in the todo list.", text)
            }
        }
        Step::Reply(vec![MENU.to_string()])
    }

    async fn on_index(&mut self, raw: &str) -> Step {
        self.state = MenuState::AwaitChoice;
        let index: i64 = match raw.trim().parse() {
            Ok(index) => index,
            Err(_) => {
                return Step::Invalid {
                    error: CommandError::InvalidIndex(raw.trim().to_string()),
                    replies: vec![MENU.to_string()],
                };
            }
        };

        match self.todos.remove_at(index).await {
            Some(removed) => {
                info!(peer = %self.peer, "{} has been removed from the todo list.", removed)
            }
            None => debug!(peer = %self.peer, index, "No todo at index"),
        }
        Step::Reply(vec![MENU.to_string()])
    }
}

impl Session for TodoSession {
    async fn greeting(&mut self) -> Vec<String> {
        vec![MENU.to_string()]
    }

    async fn on_frame(&mut self, frame: String) -> Step {
        match self.state {
            MenuState::AwaitChoice => self.on_choice(&frame).await,
            MenuState::AwaitTodoText => self.on_todo_text(frame).await,
            MenuState::AwaitIndex => self.on_index(&frame).await,
        }
    }

    // The menu cycle has no handshake.
    fn phase(&self) -> Phase {
        Phase::Steady
    }
}
