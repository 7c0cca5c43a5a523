use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::super::message::{ChatMessage, ContentItem, History, Role};
use super::super::summarize::Summarizer;
use super::super::tokens::TokenCounter;
use super::{compaction_result, no_op_result, truncate_from_beginning, CompactionResult, HistoryCompactor};

/// Summarizes the middle of the conversation, preserving leading system
/// messages and a literal tail of the most recent turns untouched.
pub struct HeadTailCompactor {
    counter: Arc<dyn TokenCounter>,
    summarizer: Option<Arc<dyn Summarizer>>,
    preserve_tail_turns: usize,
}

impl HeadTailCompactor {
    pub const DEFAULT_PRESERVE_TAIL_TURNS: usize = 5;

    pub fn new(
        counter: Arc<dyn TokenCounter>,
        summarizer: Option<Arc<dyn Summarizer>>,
        preserve_tail_turns: usize,
    ) -> Self {
        Self {
            counter,
            summarizer,
            preserve_tail_turns,
        }
    }
}

#[async_trait]
impl HistoryCompactor for HeadTailCompactor {
    async fn compact(
        &self,
        history: &History,
        target_tokens: u32,
        cancel: &CancellationToken,
    ) -> CompactionResult {
        let total = self.counter.count_messages(history);
        if total <= target_tokens {
            return no_op_result(history, self.counter.as_ref());
        }

        let system: Vec<&ChatMessage> = history.iter().filter(|m| m.role == Role::System).collect();
        let conversation: Vec<&ChatMessage> = history.iter().filter(|m| m.role != Role::System).collect();

        let tail_count = (self.preserve_tail_turns * 2).min(conversation.len());
        let split_at = conversation.len() - tail_count;
        let middle = &conversation[..split_at];
        let tail = &conversation[split_at..];

        let head_tokens: u32 = system.iter().map(|m| self.counter.count_message(m)).sum();
        let tail_tokens: u32 = tail.iter().map(|m| self.counter.count_message(m)).sum();
        let budget = target_tokens.saturating_sub(head_tokens).saturating_sub(tail_tokens);

        let middle_tokens: u32 = middle.iter().map(|m| self.counter.count_message(m)).sum();

        let mut out: Vec<ChatMessage> = system.iter().map(|m| (*m).clone()).collect();
        let mut messages_compacted = 0usize;

        if middle_tokens <= budget {
            out.extend(middle.iter().map(|m| (*m).clone()));
        } else if let Some(summary) = self.try_summarize(middle, budget, cancel).await {
            out.push(ChatMessage::system(format!(
                "[Previous conversation summary]: {summary}"
            )));
            messages_compacted = middle.len();
        } else {
            let (replacement, dropped) = truncate_from_beginning(middle, self.counter.as_ref(), budget);
            out.extend(replacement);
            messages_compacted = dropped;
        }

        out.extend(tail.iter().map(|m| (*m).clone()));

        compaction_result(out, total, self.counter.as_ref(), messages_compacted)
    }
}

impl HeadTailCompactor {
    async fn try_summarize(
        &self,
        middle: &[&ChatMessage],
        budget: u32,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        let text = middle
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), render_message(m)))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "Summarize the conversation below, preserving facts needed to continue the task.\n\n{text}"
        );
        let max_output = (budget / 4).max(1);
        match summarizer.summarize(&prompt, max_output, cancel).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "head/tail compactor falling back to truncation");
                None
            }
        }
    }
}

fn render_message(m: &ChatMessage) -> String {
    let text = m.text();
    if !text.is_empty() {
        return text;
    }
    m.content
        .iter()
        .map(|c| match c {
            ContentItem::FunctionCall { name, .. } => format!("[called {name}]"),
            ContentItem::FunctionResult { result, .. } => ContentItem::result_as_string(result),
            ContentItem::Other { kind, .. } => format!("[{kind}]"),
            ContentItem::Text(t) => t.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::message::history_from;
    use crate::context::tokens::BpeTokenCounter;

    fn counter() -> Arc<dyn TokenCounter> {
        Arc::new(BpeTokenCounter::new("claude-sonnet-4").unwrap())
    }

    #[tokio::test]
    async fn scenario_a_no_op_when_under_target() {
        let c = HeadTailCompactor::new(counter(), None, 5);
        let history = history_from(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::new(Role::Assistant, vec![ContentItem::Text("hello".into())]),
        ]);
        let result = c.compact(&history, 10_000, &CancellationToken::new()).await;
        assert!(Arc::ptr_eq(&result.compacted_history, &history));
        assert_eq!(result.messages_compacted, 0);
    }

    #[tokio::test]
    async fn falls_back_to_truncation_without_summarizer() {
        let c = HeadTailCompactor::new(counter(), None, 1);
        let mut messages = vec![ChatMessage::system("sys")];
        for i in 0..40 {
            messages.push(ChatMessage::user(format!("message number {i} with some padding text")));
        }
        let history = history_from(messages);
        let result = c.compact(&history, 50, &CancellationToken::new()).await;
        assert!(result.compacted_tokens <= result.original_tokens);
        assert!(result
            .compacted_history
            .iter()
            .any(|m| m.role == Role::System && m.text().contains("omitted")));
    }

    #[tokio::test]
    async fn preserves_system_relative_order() {
        let c = HeadTailCompactor::new(counter(), None, 1);
        let mut messages = vec![ChatMessage::system("first"), ChatMessage::system("second")];
        for i in 0..30 {
            messages.push(ChatMessage::user(format!("padding message {i} with extra words")));
        }
        let history = history_from(messages);
        let result = c.compact(&history, 30, &CancellationToken::new()).await;
        let system_texts: Vec<String> = result
            .compacted_history
            .iter()
            .filter(|m| m.role == Role::System && !m.text().contains("omitted"))
            .map(|m| m.text())
            .collect();
        assert_eq!(system_texts, vec!["first".to_string(), "second".to_string()]);
    }
}
