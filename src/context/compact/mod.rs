pub mod anchored;
pub mod head_tail;
pub mod observation_mask;
pub mod result_truncate;
pub mod token_based;

pub use anchored::AnchoredCompactor;
pub use head_tail::HeadTailCompactor;
pub use observation_mask::ObservationMasker;
pub use result_truncate::ToolResultCompactor;
pub use token_based::TokenBasedCompactor;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::message::{history_from, ChatMessage, History, Role};
use super::tokens::TokenCounter;

/// Outcome of a compaction round.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub compacted_history: History,
    pub original_tokens: u32,
    pub compacted_tokens: u32,
    pub messages_compacted: usize,
    pub compression_ratio: f32,
}

impl CompactionResult {
    fn no_op(history: &History, tokens: u32) -> Self {
        Self {
            compacted_history: history.clone(),
            original_tokens: tokens,
            compacted_tokens: tokens,
            messages_compacted: 0,
            compression_ratio: 1.0,
        }
    }
}

/// Shared entry contract for every "summarize the middle" compactor
/// variant (head/tail, token-based, anchored). `targetTokens` is a
/// best-effort bound; synthetic marker messages may push the result
/// slightly over it.
#[async_trait]
pub trait HistoryCompactor: Send + Sync {
    async fn compact(
        &self,
        history: &History,
        target_tokens: u32,
        cancel: &CancellationToken,
    ) -> CompactionResult;
}

/// Builds the no-op `CompactionResult` shared by every compactor's entry
/// guard (`tokens(history) <= target` short-circuit).
fn no_op_result(history: &History, counter: &dyn TokenCounter) -> CompactionResult {
    let tokens = counter.count_messages(history);
    CompactionResult::no_op(history, tokens)
}

/// Drops oldest messages from `messages` until the remainder fits in
/// `budget` tokens, prepending a synthetic marker system message recording
/// how many were dropped. Used as the summarizer-failure fallback by every
/// compactor that summarizes a middle region.
fn truncate_from_beginning(
    messages: &[&ChatMessage],
    counter: &dyn TokenCounter,
    budget: u32,
) -> (Vec<ChatMessage>, usize) {
    if messages.is_empty() {
        return (Vec::new(), 0);
    }
    let mut start = 0;
    loop {
        let remaining = &messages[start..];
        let tokens: u32 = remaining.iter().map(|m| counter.count_message(m)).sum();
        if tokens <= budget || start == messages.len() {
            break;
        }
        start += 1;
    }
    let dropped = start;
    let mut out = Vec::new();
    if dropped > 0 {
        out.push(ChatMessage::new(
            Role::System,
            vec![super::message::ContentItem::Text(format!(
                "[{dropped} earlier messages omitted]"
            ))],
        ));
    }
    out.extend(messages[start..].iter().map(|m| (*m).clone()));
    (out, dropped)
}

fn compaction_result(
    compacted: Vec<ChatMessage>,
    original_tokens: u32,
    counter: &dyn TokenCounter,
    messages_compacted: usize,
) -> CompactionResult {
    let compacted_tokens = counter.count_messages(&compacted);
    let compression_ratio = if original_tokens == 0 {
        1.0
    } else {
        compacted_tokens as f32 / original_tokens as f32
    };
    CompactionResult {
        compacted_history: history_from(compacted),
        original_tokens,
        compacted_tokens,
        messages_compacted,
        compression_ratio,
    }
}
