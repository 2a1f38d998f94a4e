use serde::Serialize;

use crate::page::PageContext;
use crate::state::ChatMessage;

pub const HISTORY_LIMIT: usize = 10;
pub const CONTEXT_EXCERPT_CHARS: usize = 2000;

pub const SYSTEM_PROMPT: &str = "You are ZenAi, a helpful AI assistant integrated into a web browser.
Your responses must be:
- CONCISE: Keep answers brief and to the point
- RELEVANT: Focus on the user's question and the current webpage context
- CLEAR: Use simple language and formatting
- HELPFUL: Provide actionable information when possible

When given page context, use it to provide accurate, contextual answers. If you don't have enough information, say so briefly.";

/// The outgoing message array for one turn. Built fresh, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub messages: Vec<ChatMessage>,
}

impl TurnRequest {
    /// `history` is the trimmed transcript view taken before the new user message
    /// was appended; it is copied in order.
    pub fn build(
        system_prompt: &str,
        context: Option<&PageContext>,
        history: &[ChatMessage],
        user_input: &str,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(ChatMessage::system(system_prompt));

        if let Some(page) = context {
            messages.push(ChatMessage::system(context_message(page)));
        }

        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(user_input));

        Self { messages }
    }
}

fn context_message(page: &PageContext) -> String {
    let excerpt: String = page.content.chars().take(CONTEXT_EXCERPT_CHARS).collect();
    let summary = if excerpt.is_empty() {
        "No content available"
    } else {
        excerpt.as_str()
    };

    format!(
        "Current webpage context:\nTitle: {}\nURL: {}\nContent summary: {}",
        page.title, page.url, summary
    )
}

#[derive(Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Serialize)]
pub(crate) struct ConnectionProbe<'a> {
    pub messages: &'a [ChatMessage],
    pub max_completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;

    fn page(content: &str) -> PageContext {
        PageContext {
            title: "Rust".to_string(),
            url: "https://www.rust-lang.org/".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_without_context_or_history() {
        let request = TurnRequest::build(SYSTEM_PROMPT, None, &[], "Hello");
        assert_eq!(
            request.messages,
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user("Hello")]
        );
    }

    #[test]
    fn test_context_excerpt_is_first_2000_chars() {
        let content: String = (0..6000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let request = TurnRequest::build(SYSTEM_PROMPT, Some(&page(&content)), &[], "q");

        let context = &request.messages[1];
        assert_eq!(context.role, ChatRole::System);
        let expected = format!(
            "Current webpage context:\nTitle: Rust\nURL: https://www.rust-lang.org/\nContent summary: {}",
            &content[..2000]
        );
        assert_eq!(context.content, expected);
    }

    #[test]
    fn test_context_excerpt_counts_chars_not_bytes() {
        let content = "é".repeat(2500);
        let request = TurnRequest::build(SYSTEM_PROMPT, Some(&page(&content)), &[], "q");
        let summary = request.messages[1].content.rsplit("Content summary: ").next().unwrap();
        assert_eq!(summary.chars().count(), 2000);
    }

    #[test]
    fn test_empty_page_content() {
        let request = TurnRequest::build(SYSTEM_PROMPT, Some(&page("")), &[], "q");
        assert!(request.messages[1].content.ends_with("Content summary: No content available"));
    }

    #[test]
    fn test_history_between_context_and_input() {
        let history = vec![ChatMessage::user("first"), ChatMessage::assistant("reply")];
        let request = TurnRequest::build(SYSTEM_PROMPT, Some(&page("body")), &history, "next");

        assert_eq!(request.messages.len(), 5);
        assert_eq!(&request.messages[2..4], &history[..]);
        assert_eq!(request.messages[4], ChatMessage::user("next"));
    }
}
