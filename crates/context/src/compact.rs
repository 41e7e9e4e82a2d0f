//! Compaction helpers: buffer splitting, token estimation, and the summary
//! prompt. The manager decides *when*; these functions decide *what*.

use sb_domain::message::{ContentPart, Message, MessageContent, Role};

/// Rough token estimate used before a provider has reported real numbers
/// (previews, synthetic buffers). Four characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4).max(1)
}

/// Estimate for one buffered message, counting all parts.
pub fn estimate_message_tokens(msg: &Message) -> u64 {
    match &msg.content {
        MessageContent::Text(t) => estimate_tokens(t),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } | ContentPart::Thinking { text } => {
                    estimate_tokens(text)
                }
                ContentPart::ToolUse { input, .. } => estimate_tokens(&input.to_string()),
                ContentPart::ToolResult { content, .. } => estimate_tokens(content),
            })
            .sum(),
    }
}

pub fn estimate_buffer_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Split the buffer into (to_compact, to_keep).
///
/// Keeps the trailing `keep_recent` messages, then extends the kept slice
/// back to the nearest user message so it never starts with an orphan tool
/// result. A leading system message (a previous compaction summary) is
/// always eligible for re-compaction.
pub fn split_for_compaction(
    messages: &[Message],
    keep_recent: usize,
) -> (&[Message], &[Message]) {
    if messages.len() <= keep_recent {
        return (&[], messages);
    }

    let mut keep_from = messages.len() - keep_recent;
    while keep_from > 0 && messages[keep_from].role != Role::User {
        keep_from -= 1;
    }

    (&messages[..keep_from], &messages[keep_from..])
}

/// Flatten messages into the text block fed to the summarizer. Very long
/// entries (tool results) are truncated head+tail to keep the prompt sane.
pub fn build_conversation_text(messages: &[Message]) -> String {
    let mut buf = String::new();
    for msg in messages {
        let role_label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        let content = msg.content.extract_all_text();
        if content.len() > 2000 {
            buf.push_str(&content[..1000]);
            buf.push_str(" [...] ");
            buf.push_str(&content[content.len() - 500..]);
        } else {
            buf.push_str(&content);
        }
        buf.push('\n');
    }
    buf
}

/// The summarization instruction wrapped around the conversation text.
pub fn summary_prompt(conversation: &str) -> String {
    format!(
        "You are a conversation summarizer. Summarize the following conversation \
         history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user or context\n\
         5. Tool state (running processes, active sessions, pending work)\n\n\
         Be concise but preserve all actionable context. Write in present tense.\n\
         Omit greetings and pleasantries. Focus on substance.\n\n\
         CONVERSATION:\n{conversation}"
    )
}
