use crate::state::{ChatMessage, ChatRole};

/// Ordered conversation history for one session.
///
/// Entries are immutable once appended, except the last assistant message while it
/// is still streaming. The only removal is [`Transcript::rollback_last`].
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Replaces the content of the last message if it has the given role.
    pub fn update_last(&mut self, role: ChatRole, content: &str) -> bool {
        match self.messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.clear();
                last.content.push_str(content);
                true
            }
            _ => false,
        }
    }

    /// The last `n` messages in original order.
    pub fn trim_history_view(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Withdraws the last message if it has the given role.
    pub fn rollback_last(&mut self, role: ChatRole) -> Option<ChatMessage> {
        if self.messages.last().map(|m| m.role) == Some(role) {
            self.messages.pop()
        } else {
            None
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
