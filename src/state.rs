use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Number of messages replayed to a newly joined chat client.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Bounded, process-wide chat history
///
/// Keeps the most recent `capacity` messages, oldest first. Every method is
/// a single short critical section; callers only ever receive owned copies.
pub struct ChatHistory {
    capacity: usize,
    messages: RwLock<VecDeque<String>>,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message, evicting the oldest one when the buffer is full
    pub async fn append(&self, text: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut messages = self.messages.write().await;
        while messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(text.into());
    }

    /// Ordered copy of the buffer, newest last
    pub async fn snapshot(&self) -> Vec<String> {
        self.messages.read().await.iter().cloned().collect()
    }

    /// Buffer rendered as one message per line, each terminated by `\n`
    pub async fn render(&self) -> String {
        let messages = self.messages.read().await;
        let mut out = String::new();
        for message in messages.iter() {
            out.push_str(message);
            out.push('\n');
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Result of [`TodoList::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// Shared, duplicate-free todo list
pub struct TodoList {
    todos: RwLock<Vec<String>>,
}

impl TodoList {
    pub fn new() -> Self {
        Self {
            todos: RwLock::new(Vec::new()),
        }
    }

    /// Add a todo unless the exact same text is already listed
    pub async fn add(&self, text: impl Into<String>) -> AddOutcome {
        let text = text.into();
        let mut todos = self.todos.write().await;

        if todos.contains(&text) {
            return AddOutcome::AlreadyPresent;
        }
        todos.push(text);
        AddOutcome::Added
    }

    pub async fn list(&self) -> Vec<String> {
        self.todos.read().await.clone()
    }

    /// Numbered listing, one `"{n}. {todo}\n"` line per entry (1-based)
    pub async fn render(&self) -> String {
        let todos = self.todos.read().await;
        let mut out = String::new();
        for (i, todo) in todos.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, todo));
        }
        out
    }

    /// Remove the todo at a 1-based index
    ///
    /// Indices outside `1..=len` leave the list untouched and return `None`.
    pub async fn remove_at(&self, index: i64) -> Option<String> {
        let mut todos = self.todos.write().await;
        if index < 1 || index as u64 > todos.len() as u64 {
            return None;
        }
        Some(todos.remove(index as usize - 1))
    }

    pub async fn len(&self) -> usize {
        self.todos.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.todos.read().await.is_empty()
    }
}

impl Default for TodoList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_render_history() {
        let history = ChatHistory::new(3);
        history.append("[Alice]: hi").await;
        history.append("[Bob]: yo").await;
        assert_eq!(history.render().await, "[Alice]: hi\n[Bob]: yo\n");
    }

    #[tokio::test]
    async fn test_zero_capacity_history_stays_empty() {
        let history = ChatHistory::new(0);
        history.append("dropped").await;
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_render_todos() {
        let todos = TodoList::new();
        assert_eq!(todos.render().await, "");
        todos.add("buy milk").await;
        todos.add("walk dog").await;
        assert_eq!(todos.render().await, "1. buy milk\n2. walk dog\n");
    }

    #[tokio::test]
    async fn test_remove_last_index() {
        let todos = TodoList::new();
        todos.add("a").await;
        todos.add("b").await;
        assert_eq!(todos.remove_at(2).await.as_deref(), Some("b"));
        assert_eq!(todos.list().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_from_empty_list() {
        let todos = TodoList::new();
        assert_eq!(todos.remove_at(1).await, None);
        assert_eq!(todos.remove_at(-3).await, None);
    }
}
