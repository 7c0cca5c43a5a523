use serde_json::{Map, Value};
use tiktoken_rs::CoreBPE;

use super::message::{ChatMessage, ContentItem};
use super::ConfigError;

/// Per-message base overhead: every message costs a handful of tokens for
/// role framing regardless of content (mirrors the wire protocol's own
/// per-message envelope).
const MESSAGE_OVERHEAD: u32 = 4;
/// Flat overhead added to a function call for its JSON envelope, beyond the
/// name and serialized arguments.
const FUNCTION_CALL_OVERHEAD: u32 = 10;
/// Fixed cost for non-text content whose real cost isn't worth computing
/// precisely (image references, thinking blocks, …).
const OTHER_CONTENT_TOKENS: u32 = 85;
/// Priming tokens added once per request, independent of message count.
const CONVERSATION_PRIMING: u32 = 3;

/// (model-id prefix, context window in tokens). Checked exact-match first,
/// then longest-prefix-match, in table order. Falls back to 8192.
const MODEL_CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("claude-opus-4", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-3-5-sonnet", 200_000),
    ("claude-3-5-haiku", 200_000),
    ("claude-3-opus", 200_000),
    ("claude-3-haiku", 200_000),
    ("claude-3-sonnet", 200_000),
    ("o3", 200_000),
    ("o1", 200_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4.1", 1_000_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("deepseek-r1", 128_000),
    ("qwen2.5", 128_000),
    ("qwen2", 32_000),
    ("llama3.1", 128_000),
    ("llama3.2", 128_000),
    ("llama3", 8_192),
    ("mistral", 32_000),
    ("gemini-1.5-pro", 1_000_000),
    ("gemini-1.5-flash", 1_000_000),
    ("gemini-2.0", 1_000_000),
];

const DEFAULT_CONTEXT_WINDOW: u32 = 8_192;

/// Polymorphic over a model id. Counting may be approximate, but must be
/// monotonic per byte so budget arithmetic never goes backwards as content
/// grows.
pub trait TokenCounter: Send + Sync {
    fn count_text(&self, s: &str) -> u32;
    fn count_message(&self, message: &ChatMessage) -> u32;
    fn count_messages(&self, messages: &[ChatMessage]) -> u32 {
        let sum: u32 = messages.iter().map(|m| self.count_message(m)).sum();
        sum + CONVERSATION_PRIMING
    }
    fn max_context_tokens(&self) -> u32;
    fn model(&self) -> &str;
}

/// Token counter backed by `tiktoken-rs`'s bundled `cl100k_base` ranks.
/// Real BPE tokenization, not a chars/4 guess — counting drives compaction
/// decisions that actually gate what fits in the request.
pub struct BpeTokenCounter {
    model: String,
    bpe: CoreBPE,
    max_context_tokens: u32,
}

impl BpeTokenCounter {
    pub fn new(model: impl Into<String>) -> Result<Self, ConfigError> {
        let model = model.into();
        if model.is_empty() {
            return Err(ConfigError::new("model id must not be empty"));
        }
        let bpe = tiktoken_rs::cl100k_base().expect("bundled cl100k_base ranks");
        let max_context_tokens = lookup_context_window(&model);
        Ok(Self {
            model,
            bpe,
            max_context_tokens,
        })
    }

    fn count_arguments(&self, arguments: &Map<String, Value>) -> u32 {
        self.count_text(&Value::Object(arguments.clone()).to_string())
    }
}

fn lookup_context_window(model: &str) -> u32 {
    if let Some((_, window)) = MODEL_CONTEXT_WINDOWS.iter().find(|(name, _)| *name == model) {
        return *window;
    }
    if let Some((_, window)) = MODEL_CONTEXT_WINDOWS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
    {
        return *window;
    }
    DEFAULT_CONTEXT_WINDOW
}

impl TokenCounter for BpeTokenCounter {
    fn count_text(&self, s: &str) -> u32 {
        self.bpe.encode_ordinary(s).len() as u32
    }

    fn count_message(&self, message: &ChatMessage) -> u32 {
        let mut total = MESSAGE_OVERHEAD + self.count_text(&message.text());
        for item in &message.content {
            total += match item {
                ContentItem::Text(_) => 0, // already folded into message.text() above
                ContentItem::FunctionCall {
                    name, arguments, ..
                } => self.count_text(name) + self.count_arguments(arguments) + FUNCTION_CALL_OVERHEAD,
                ContentItem::FunctionResult { result, .. } => {
                    self.count_text(&ContentItem::result_as_string(result))
                }
                ContentItem::Other { approx_tokens, .. } => {
                    if *approx_tokens > 0 {
                        *approx_tokens
                    } else {
                        OTHER_CONTENT_TOKENS
                    }
                }
            };
        }
        total
    }

    fn max_context_tokens(&self) -> u32 {
        self.max_context_tokens
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::message::{ChatMessage, Role};

    #[test]
    fn rejects_empty_model() {
        assert!(BpeTokenCounter::new("").is_err());
    }

    #[test]
    fn exact_match_window() {
        let c = BpeTokenCounter::new("claude-opus-4").unwrap();
        assert_eq!(c.max_context_tokens(), 200_000);
    }

    #[test]
    fn prefix_match_window() {
        let c = BpeTokenCounter::new("claude-opus-4-20250514").unwrap();
        assert_eq!(c.max_context_tokens(), 200_000);
    }

    #[test]
    fn unknown_model_falls_back() {
        let c = BpeTokenCounter::new("some-unknown-model-xyz").unwrap();
        assert_eq!(c.max_context_tokens(), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn counting_is_monotonic_under_prefix_extension() {
        let c = BpeTokenCounter::new("claude-sonnet-4").unwrap();
        let base = "The quick brown fox jumps over the lazy dog.";
        let mut prev = c.count_text(base);
        let mut grown = base.to_string();
        for _ in 0..20 {
            grown.push_str(" more words here");
            let next = c.count_text(&grown);
            assert!(next >= prev, "token count decreased: {prev} -> {next}");
            prev = next;
        }
    }

    #[test]
    fn count_messages_adds_priming() {
        let c = BpeTokenCounter::new("claude-sonnet-4").unwrap();
        let msgs = vec![ChatMessage::user("hi")];
        let per_message = c.count_message(&msgs[0]);
        assert_eq!(c.count_messages(&msgs), per_message + CONVERSATION_PRIMING);
    }

    #[test]
    fn function_call_costs_name_args_and_overhead() {
        let c = BpeTokenCounter::new("claude-sonnet-4").unwrap();
        let mut args = Map::new();
        args.insert("path".into(), Value::String("/tmp/x".into()));
        let msg = ChatMessage::new(
            Role::Assistant,
            vec![ContentItem::FunctionCall {
                call_id: "c1".into(),
                name: "read_file".into(),
                arguments: args.clone(),
            }],
        );
        let expected = MESSAGE_OVERHEAD
            + c.count_text("read_file")
            + c.count_text(&Value::Object(args).to_string())
            + FUNCTION_CALL_OVERHEAD;
        assert_eq!(c.count_message(&msg), expected);
    }
}
