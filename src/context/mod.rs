//! Context-window management: token accounting, compaction triggers and
//! strategies, goal reminders, scratchpad, tool retrieval, schema
//! compression, and prompt-cache hinting.
//!
//! [`simple::ManagedContextManager`] is the zero-configuration default,
//! operating directly on raw wire-format JSON. [`manager::ContextOrchestrator`]
//! is the fully configurable pipeline built on the typed [`message::ChatMessage`]
//! model, for callers that want every stage individually tunable.

pub mod anchors;
pub mod cache_hint;
pub mod compact;
pub mod goal;
pub mod manager;
pub mod message;
pub mod retrieve;
pub mod schema;
pub mod scratchpad;
pub mod simple;
pub mod splitter;
pub mod summarize;
pub mod tokens;
pub mod trigger;

pub use compact::{CompactionResult, HistoryCompactor};
pub use manager::{CompactionConfig, ContextOrchestrator, ContextUsage, PreparedTurn};
pub use message::{ChatMessage, ContentItem, History, Role};
pub use simple::{estimate_str_tokens, estimate_tokens, ContextManager, ManagedContextManager, TokenBudget};
pub use summarize::{InferenceSummarizer, Summarizer};
pub use tokens::{BpeTokenCounter, TokenCounter};
pub use trigger::CompactionTrigger;

/// Invalid configuration: an empty model id, an out-of-range threshold, a
/// negative knob. Surfaced immediately at construction time, never swallowed.
#[derive(Debug, thiserror::Error)]
#[error("invalid context configuration: {0}")]
pub struct ConfigError(String);

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A summarization call failed or was cancelled. Compactors that depend on
/// an LLM summary always treat this as recoverable: log at `warn` and fall
/// back to a non-LLM strategy (e.g. head/tail truncation) rather than
/// propagate the error to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarization request failed: {0}")]
    Request(String),
    #[error("summarization cancelled")]
    Cancelled,
}
