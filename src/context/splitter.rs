use super::message::{ChatMessage, Role};
use super::tokens::TokenCounter;

/// A history partitioned into the three regions every compactor reasons
/// about. Never mutates its input — holds indices into the source slice.
pub struct Split<'h> {
    pub system: Vec<&'h ChatMessage>,
    pub prunable_middle: Vec<&'h ChatMessage>,
    pub protected_tail: Vec<&'h ChatMessage>,
}

/// Splits `history` into system / prunable-middle / protected-tail.
///
/// The protected tail is built by walking the conversation region (every
/// non-system message) backward, accumulating messages while their running
/// token total stays `<= protect_recent_tokens`; the first message that
/// would push the total over the budget stops the walk. Everything earlier
/// in the conversation region is the prunable middle.
pub fn split_history<'h>(
    history: &'h [ChatMessage],
    counter: &dyn TokenCounter,
    protect_recent_tokens: u32,
) -> Split<'h> {
    let system: Vec<&ChatMessage> = history.iter().filter(|m| m.role == Role::System).collect();
    let conversation: Vec<&ChatMessage> = history.iter().filter(|m| m.role != Role::System).collect();

    let mut protected_tail: Vec<&ChatMessage> = Vec::new();
    let mut running = 0u32;
    for msg in conversation.iter().rev() {
        let cost = counter.count_message(msg);
        if running + cost > protect_recent_tokens && !protected_tail.is_empty() {
            break;
        }
        running += cost;
        protected_tail.push(msg);
        if running > protect_recent_tokens {
            break;
        }
    }
    protected_tail.reverse();

    let middle_len = conversation.len() - protected_tail.len();
    let prunable_middle: Vec<&ChatMessage> = conversation[..middle_len].to_vec();

    Split {
        system,
        prunable_middle,
        protected_tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tokens::BpeTokenCounter;

    #[test]
    fn splits_system_region_separately() {
        let counter = BpeTokenCounter::new("claude-sonnet-4").unwrap();
        let history = vec![
            ChatMessage::system("be nice"),
            ChatMessage::user("hi"),
            ChatMessage::user("how are you"),
        ];
        let split = split_history(&history, &counter, 1_000_000);
        assert_eq!(split.system.len(), 1);
        assert_eq!(split.prunable_middle.len(), 0);
        assert_eq!(split.protected_tail.len(), 2);
    }

    #[test]
    fn protected_tail_stops_at_budget() {
        let counter = BpeTokenCounter::new("claude-sonnet-4").unwrap();
        let long = "word ".repeat(500);
        let history = vec![
            ChatMessage::user(long.clone()),
            ChatMessage::user(long.clone()),
            ChatMessage::user("short tail message"),
        ];
        let budget = counter.count_message(&history[2]) + 1;
        let split = split_history(&history, &counter, budget);
        assert_eq!(split.protected_tail.len(), 1);
        assert_eq!(split.prunable_middle.len(), 2);
    }

    #[test]
    fn protected_tail_always_keeps_at_least_last_message() {
        let counter = BpeTokenCounter::new("claude-sonnet-4").unwrap();
        let long = "word ".repeat(5000);
        let history = vec![ChatMessage::user(long)];
        let split = split_history(&history, &counter, 1);
        assert_eq!(split.protected_tail.len(), 1);
        assert!(split.prunable_middle.is_empty());
    }
}
