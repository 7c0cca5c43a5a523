use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::super::anchors::{is_state_block, ConversationAnchors};
use super::super::message::{ChatMessage, History, Role};
use super::super::splitter::split_history;
use super::super::summarize::Summarizer;
use super::super::tokens::TokenCounter;
use super::{compaction_result, no_op_result, truncate_from_beginning, CompactionResult, HistoryCompactor};

const MIN_SUMMARY_BUDGET: u32 = 100;

/// Summarizes the prunable middle while carrying a structured
/// [`ConversationAnchors`] state block across rounds, so facts (goal,
/// files touched, failed approaches, error codes) survive iterated
/// summarization instead of drifting away.
pub struct AnchoredCompactor {
    counter: Arc<dyn TokenCounter>,
    summarizer: Option<Arc<dyn Summarizer>>,
    pub protect_recent_tokens: u32,
}

impl AnchoredCompactor {
    pub const DEFAULT_PROTECT_RECENT_TOKENS: u32 = 40_000;

    pub fn new(counter: Arc<dyn TokenCounter>, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
        Self {
            counter,
            summarizer,
            protect_recent_tokens: Self::DEFAULT_PROTECT_RECENT_TOKENS,
        }
    }

    async fn try_summarize(
        &self,
        prunable: &[&ChatMessage],
        budget: u32,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        let text = prunable
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.text()))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "Summarize the conversation below. Preserve the session goal, key \
             decisions, failed approaches, file paths touched, error codes, and \
             next steps.\n\n{text}"
        );
        let max_output = (budget / 4).max(MIN_SUMMARY_BUDGET);
        match summarizer.summarize(&prompt, max_output, cancel).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "anchored compactor falling back to truncation");
                None
            }
        }
    }
}

#[async_trait]
impl HistoryCompactor for AnchoredCompactor {
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

        // Scan for an existing state block and strip it from the working set.
        let mut existing_anchors = ConversationAnchors::default();
        let filtered: Vec<&ChatMessage> = history
            .iter()
            .filter(|m| {
                if is_state_block(m) {
                    existing_anchors = existing_anchors.merge(&ConversationAnchors::parse(&m.text()));
                    false
                } else {
                    true
                }
            })
            .collect();

        let other_system: Vec<&ChatMessage> = filtered
            .iter()
            .filter(|m| m.role == Role::System)
            .copied()
            .collect();
        let conversation: Vec<&ChatMessage> = filtered
            .iter()
            .filter(|m| m.role != Role::System)
            .copied()
            .collect();

        // Reuse the splitter's protected-tail walk over the filtered conversation.
        let tail_source: Vec<ChatMessage> = conversation.iter().map(|m| (*m).clone()).collect();
        let split = split_history(&tail_source, self.counter.as_ref(), self.protect_recent_tokens);
        let tail_len = split.protected_tail.len();
        let prunable_middle = &conversation[..conversation.len() - tail_len];
        let protected_tail = &conversation[conversation.len() - tail_len..];

        let new_anchors = ConversationAnchors::extract(prunable_middle);
        let merged = existing_anchors.merge(&new_anchors);
        let state_block_text = merged.format();

        let system_tokens: u32 = other_system.iter().map(|m| self.counter.count_message(m)).sum();
        let tail_tokens: u32 = protected_tail.iter().map(|m| self.counter.count_message(m)).sum();
        let state_block_tokens = self.counter.count_text(&state_block_text);

        let budget = target_tokens
            .saturating_sub(system_tokens)
            .saturating_sub(tail_tokens)
            .saturating_sub(state_block_tokens);

        let mut out: Vec<ChatMessage> = other_system.iter().map(|m| (*m).clone()).collect();
        if !merged.is_empty() {
            out.push(ChatMessage::system(state_block_text));
        }

        let mut messages_compacted = 0usize;
        if let Some(summary) = self.try_summarize(prunable_middle, budget, cancel).await {
            out.push(ChatMessage::system(format!(
                "[Previous conversation summary]: {summary}"
            )));
            messages_compacted = prunable_middle.len();
        } else {
            let (replacement, dropped) =
                truncate_from_beginning(prunable_middle, self.counter.as_ref(), budget);
            out.extend(replacement);
            messages_compacted = dropped;
        }

        out.extend(protected_tail.iter().map(|m| (*m).clone()));

        compaction_result(out, total, self.counter.as_ref(), messages_compacted)
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
    async fn scenario_a_no_op_when_under_target() {
        let c = AnchoredCompactor::new(counter(), None);
        let history = history_from(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::new(Role::Assistant, vec![ContentItem::Text("hello".into())]),
        ]);
        let result = c.compact(&history, 10_000, &CancellationToken::new()).await;
        assert!(Arc::ptr_eq(&result.compacted_history, &history));
    }

    #[tokio::test]
    async fn scenario_d_goal_appears_in_state_block() {
        let mut c = AnchoredCompactor::new(counter(), None);
        c.protect_recent_tokens = 1;
        let mut messages = vec![ChatMessage::user("Refactor the authentication module")];
        for i in 0..30 {
            messages.push(ChatMessage::user(format!("padding turn number {i} with words")));
        }
        let history = history_from(messages);
        let result = c.compact(&history, 20, &CancellationToken::new()).await;
        let has_goal = result.compacted_history.iter().any(|m| {
            m.role == Role::System && m.text().contains("Refactor the authentication module")
        });
        assert!(has_goal);
    }

    #[tokio::test]
    async fn cumulativity_across_rounds() {
        let mut c = AnchoredCompactor::new(counter(), None);
        c.protect_recent_tokens = 1;

        let mut messages = vec![ChatMessage::new(
            Role::Assistant,
            vec![ContentItem::FunctionCall {
                call_id: "c1".into(),
                name: "write_file".into(),
                arguments: serde_json::json!({"path": "a.rs"}).as_object().unwrap().clone(),
            }],
        )];
        for i in 0..20 {
            messages.push(ChatMessage::user(format!("turn {i} with enough padding words here")));
        }
        let history = history_from(messages);
        let round1 = c.compact(&history, 20, &CancellationToken::new()).await;

        let mut second_round_messages: Vec<ChatMessage> =
            round1.compacted_history.iter().cloned().collect();
        second_round_messages.push(ChatMessage::new(
            Role::Assistant,
            vec![ContentItem::FunctionCall {
                call_id: "c2".into(),
                name: "edit_file".into(),
                arguments: serde_json::json!({"path": "b.rs"}).as_object().unwrap().clone(),
            }],
        ));
        for i in 0..20 {
            second_round_messages.push(ChatMessage::user(format!(
                "round2 turn {i} with enough padding words here"
            )));
        }
        let history2 = history_from(second_round_messages);
        let round2 = c.compact(&history2, 20, &CancellationToken::new()).await;

        let state_block = round2
            .compacted_history
            .iter()
            .find(|m| is_state_block(m))
            .expect("state block present");
        assert!(state_block.text().contains("a.rs"));
        assert!(state_block.text().contains("b.rs"));
    }
}
