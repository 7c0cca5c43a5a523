use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::super::message::{ChatMessage, History, Role};
use super::super::splitter::split_history;
use super::super::summarize::Summarizer;
use super::super::tokens::TokenCounter;
use super::{compaction_result, no_op_result, truncate_from_beginning, CompactionResult, HistoryCompactor};

/// Compacts the prunable middle while always keeping "important" tool
/// output intact: every tool-role message, and every assistant message
/// whose function call invoked one of `protected_tool_outputs`.
pub struct TokenBasedCompactor {
    counter: Arc<dyn TokenCounter>,
    summarizer: Option<Arc<dyn Summarizer>>,
    pub protect_recent_tokens: u32,
    pub minimum_prune_tokens: u32,
    pub protected_tool_outputs: Vec<String>,
}

impl TokenBasedCompactor {
    pub const DEFAULT_PROTECT_RECENT_TOKENS: u32 = 40_000;
    pub const DEFAULT_MINIMUM_PRUNE_TOKENS: u32 = 20_000;

    pub fn new(counter: Arc<dyn TokenCounter>, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
        Self {
            counter,
            summarizer,
            protect_recent_tokens: Self::DEFAULT_PROTECT_RECENT_TOKENS,
            minimum_prune_tokens: Self::DEFAULT_MINIMUM_PRUNE_TOKENS,
            protected_tool_outputs: vec!["read_file".into(), "grep".into(), "glob".into()],
        }
    }

    fn is_protected_assistant(&self, msg: &ChatMessage) -> bool {
        msg.function_calls().any(|(_, name, _)| {
            self.protected_tool_outputs
                .iter()
                .any(|p| name.to_lowercase().contains(&p.to_lowercase()))
        })
    }
}

#[async_trait]
impl HistoryCompactor for TokenBasedCompactor {
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

        let split = split_history(history, self.counter.as_ref(), self.protect_recent_tokens);
        let prunable_tokens: u32 = split
            .prunable_middle
            .iter()
            .map(|m| self.counter.count_message(m))
            .sum();

        if prunable_tokens < self.minimum_prune_tokens {
            return no_op_result(history, self.counter.as_ref());
        }

        let mut important: Vec<&ChatMessage> = Vec::new();
        let mut regular: Vec<&ChatMessage> = Vec::new();
        for msg in &split.prunable_middle {
            if msg.role == Role::Tool || (msg.role == Role::Assistant && self.is_protected_assistant(msg)) {
                important.push(msg);
            } else {
                regular.push(msg);
            }
        }

        let head_tokens: u32 = split.system.iter().map(|m| self.counter.count_message(m)).sum();
        let tail_tokens: u32 = split
            .protected_tail
            .iter()
            .map(|m| self.counter.count_message(m))
            .sum();
        let important_tokens: u32 = important.iter().map(|m| self.counter.count_message(m)).sum();
        let budget = target_tokens
            .saturating_sub(head_tokens)
            .saturating_sub(tail_tokens)
            .saturating_sub(important_tokens);

        let mut out: Vec<ChatMessage> = split.system.iter().map(|m| (*m).clone()).collect();
        let mut messages_compacted = 0usize;

        let regular_tokens: u32 = regular.iter().map(|m| self.counter.count_message(m)).sum();
        if regular_tokens <= budget {
            out.extend(regular.iter().map(|m| (*m).clone()));
        } else if let Some(summary) = self.try_summarize(&regular, budget, cancel).await {
            out.push(ChatMessage::system(format!(
                "[Previous conversation summary]: {summary}"
            )));
            messages_compacted = regular.len();
        } else {
            let (replacement, dropped) = truncate_from_beginning(&regular, self.counter.as_ref(), budget);
            out.extend(replacement);
            messages_compacted = dropped;
        }

        out.extend(important.iter().map(|m| (*m).clone()));
        out.extend(split.protected_tail.iter().map(|m| (*m).clone()));

        compaction_result(out, total, self.counter.as_ref(), messages_compacted)
    }
}

impl TokenBasedCompactor {
    async fn try_summarize(
        &self,
        regular: &[&ChatMessage],
        budget: u32,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        let text = regular
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.text()))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "Summarize the conversation below, preserving facts needed to continue the task.\n\n{text}"
        );
        let max_output = (budget / 4).max(1);
        match summarizer.summarize(&prompt, max_output, cancel).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "token-based compactor falling back to truncation");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::message::{history_from, ContentItem};
    use crate::context::tokens::BpeTokenCounter;

    fn counter() -> Arc<dyn TokenCounter> {
        Arc::new(BpeTokenCounter::new("claude-sonnet-4").unwrap())
    }

    #[tokio::test]
    async fn short_circuits_when_too_little_prunable() {
        let mut c = TokenBasedCompactor::new(counter(), None);
        c.protect_recent_tokens = 1_000_000;
        c.minimum_prune_tokens = 1;
        let history = history_from(vec![ChatMessage::user("hi"), ChatMessage::user("there")]);
        let result = c.compact(&history, 1, &CancellationToken::new()).await;
        assert!(Arc::ptr_eq(&result.compacted_history, &history));
    }

    #[tokio::test]
    async fn keeps_tool_messages_as_important() {
        let mut c = TokenBasedCompactor::new(counter(), None);
        c.protect_recent_tokens = 5;
        c.minimum_prune_tokens = 1;
        let mut messages = vec![ChatMessage::new(
            Role::Tool,
            vec![ContentItem::function_result("c1", "important tool output", false)],
        )];
        for i in 0..30 {
            messages.push(ChatMessage::user(format!("padding message number {i} here")));
        }
        let history = history_from(messages);
        let result = c.compact(&history, 20, &CancellationToken::new()).await;
        assert!(result
            .compacted_history
            .iter()
            .any(|m| m.role == Role::Tool));
    }
}
