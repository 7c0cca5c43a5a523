use std::collections::HashSet;

use serde_json::json;

use super::message::{history_from, ChatMessage, History, Role};
use super::tokens::TokenCounter;

/// Net saving the protocol documents for a provider that charges more to
/// write a cache entry than it refunds on a hit: writes cost 25%, reads
/// cost 10%, so a perfectly reused prefix nets ~90% of its tokens back.
const CACHE_NET_SAVINGS_FACTOR: f32 = 0.90;

/// Options for annotating cacheable prompt prefixes.
#[derive(Debug, Clone)]
pub struct CacheHintOptions {
    pub enabled: bool,
    pub min_system_prompt_tokens: u32,
    pub cache_breakpoints: HashSet<usize>,
}

impl Default for CacheHintOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            min_system_prompt_tokens: 1024,
            cache_breakpoints: HashSet::new(),
        }
    }
}

/// Estimated token savings from the prefix-caching hints currently applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavingsEstimate {
    pub cacheable_tokens: u32,
    pub total_tokens: u32,
    pub savings_pct: f32,
}

/// Annotates a fresh history where every qualifying system message and
/// every message at a configured breakpoint index carries a `cache_control`
/// hint in its additional-properties map. Returns the input unchanged
/// (same allocation) when disabled or nothing qualifies.
pub fn apply_cache_hints(
    history: &History,
    counter: &dyn TokenCounter,
    options: &CacheHintOptions,
) -> History {
    if !options.enabled {
        return history.clone();
    }

    let mut changed = false;
    let mut out: Vec<ChatMessage> = Vec::with_capacity(history.len());

    for (idx, msg) in history.iter().enumerate() {
        let qualifies_as_system =
            msg.role == Role::System && counter.count_message(msg) >= options.min_system_prompt_tokens;
        let is_breakpoint = options.cache_breakpoints.contains(&idx);

        if qualifies_as_system || is_breakpoint {
            changed = true;
            let mut next = msg.clone();
            next.extra.insert("cache_control".to_string(), json!({ "type": "ephemeral" }));
            out.push(next);
        } else {
            out.push(msg.clone());
        }
    }

    if changed {
        history_from(out)
    } else {
        history.clone()
    }
}

/// Indices of every qualifying system message, plus the index immediately
/// before every 10th user message (counted in history order) — a
/// reasonable default breakpoint set for callers that don't want to pick
/// their own.
pub fn calculate_optimal_breakpoints(
    history: &[ChatMessage],
    counter: &dyn TokenCounter,
    min_system_prompt_tokens: u32,
) -> Vec<usize> {
    let mut breakpoints: HashSet<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::System && counter.count_message(m) >= min_system_prompt_tokens)
        .map(|(idx, _)| idx)
        .collect();

    let mut user_count = 0u32;
    for (idx, msg) in history.iter().enumerate() {
        if msg.role == Role::User {
            user_count += 1;
            if user_count % 10 == 0 && idx > 0 {
                breakpoints.insert(idx - 1);
            }
        }
    }

    let mut sorted: Vec<usize> = breakpoints.into_iter().collect();
    sorted.sort_unstable();
    sorted
}

/// Token accounting for how much of the current prompt is cacheable under
/// `min_system_prompt_tokens`, and the expected net savings (spec §4.14).
pub fn estimate_savings(
    history: &[ChatMessage],
    counter: &dyn TokenCounter,
    min_system_prompt_tokens: u32,
) -> SavingsEstimate {
    let total_tokens = counter.count_messages(history);
    let cacheable_tokens: u32 = history
        .iter()
        .filter(|m| m.role == Role::System && counter.count_message(m) >= min_system_prompt_tokens)
        .map(|m| counter.count_message(m))
        .sum();

    let savings_pct = if total_tokens == 0 {
        0.0
    } else {
        (cacheable_tokens as f32 / total_tokens as f32) * CACHE_NET_SAVINGS_FACTOR
    };

    SavingsEstimate {
        cacheable_tokens,
        total_tokens,
        savings_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::message::history_from;
    use crate::context::tokens::BpeTokenCounter;
    use std::sync::Arc;

    fn counter() -> BpeTokenCounter {
        BpeTokenCounter::new("claude-sonnet-4").unwrap()
    }

    #[test]
    fn annotates_large_system_message() {
        let c = counter();
        let big_system = "word ".repeat(2000);
        let history = history_from(vec![ChatMessage::system(big_system), ChatMessage::user("hi")]);
        let options = CacheHintOptions {
            min_system_prompt_tokens: 100,
            ..Default::default()
        };
        let out = apply_cache_hints(&history, &c, &options);
        assert_eq!(out[0].extra["cache_control"]["type"], "ephemeral");
        assert!(out[1].extra.get("cache_control").is_none());
    }

    #[test]
    fn disabled_returns_same_reference() {
        let c = counter();
        let history = history_from(vec![ChatMessage::system("short")]);
        let options = CacheHintOptions {
            enabled: false,
            ..Default::default()
        };
        let out = apply_cache_hints(&history, &c, &options);
        assert!(Arc::ptr_eq(&history, &out));
    }

    #[test]
    fn no_qualifying_message_returns_same_reference() {
        let c = counter();
        let history = history_from(vec![ChatMessage::system("short")]);
        let options = CacheHintOptions {
            min_system_prompt_tokens: 100_000,
            cache_breakpoints: HashSet::new(),
            ..Default::default()
        };
        let out = apply_cache_hints(&history, &c, &options);
        assert!(Arc::ptr_eq(&history, &out));
    }

    #[test]
    fn breakpoint_index_annotated_even_if_not_system() {
        let c = counter();
        let history = history_from(vec![ChatMessage::system("short"), ChatMessage::user("hi")]);
        let mut breakpoints = HashSet::new();
        breakpoints.insert(1);
        let options = CacheHintOptions {
            min_system_prompt_tokens: 100_000,
            cache_breakpoints: breakpoints,
            ..Default::default()
        };
        let out = apply_cache_hints(&history, &c, &options);
        assert_eq!(out[1].extra["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn optimal_breakpoints_include_every_tenth_user_message() {
        let c = counter();
        let mut messages = Vec::new();
        for i in 0..10 {
            messages.push(ChatMessage::user(format!("turn {i}")));
        }
        let history = messages;
        let breakpoints = calculate_optimal_breakpoints(&history, &c, 100_000);
        // 10th user message is at index 9; breakpoint is index 8.
        assert!(breakpoints.contains(&8));
    }

    #[test]
    fn savings_estimate_applies_net_factor() {
        let c = counter();
        let big_system = "word ".repeat(2000);
        let history = vec![ChatMessage::system(big_system), ChatMessage::user("hi")];
        let estimate = estimate_savings(&history, &c, 100);
        assert!(estimate.cacheable_tokens > 0);
        assert!(estimate.savings_pct > 0.0 && estimate.savings_pct < 1.0);
    }
}
