use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::cache_hint::{apply_cache_hints, CacheHintOptions};
use super::compact::{
    AnchoredCompactor, CompactionResult, HeadTailCompactor, HistoryCompactor, ObservationMasker,
    TokenBasedCompactor, ToolResultCompactor,
};
use super::goal::GoalReminder;
use super::message::{history_from, ChatMessage, History, Role};
use super::retrieve::{KeywordRetriever, RetrievalResult, RetrieverOptions, ToolRetriever};
use super::schema::{compress_tools, CompressionLevel};
use super::scratchpad::Scratchpad;
use super::summarize::Summarizer;
use super::tokens::{BpeTokenCounter, TokenCounter};
use super::trigger::{CompactionTrigger, ThresholdTrigger, TokenBasedTrigger};
use super::ConfigError;
use crate::tools::Tool;

/// Fraction of `maxContextTokens` a triggered compaction round targets.
const COMPACTION_TARGET_FRACTION: f32 = 0.70;

/// Which trigger/compactor pair `ContextOrchestrator::for_model` wires up,
/// and which cheap per-turn stages run ahead of the trigger check.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub use_anchored_compaction: bool,
    pub use_token_based_compaction: bool,
    pub enable_tool_result_compaction: bool,
    pub enable_observation_masking: bool,
    pub protect_recent_tokens: u32,
    pub minimum_prune_tokens: u32,
    pub threshold_p: f32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            use_anchored_compaction: false,
            use_token_based_compaction: false,
            enable_tool_result_compaction: true,
            enable_observation_masking: true,
            protect_recent_tokens: TokenBasedTrigger::DEFAULT_PROTECT_RECENT,
            minimum_prune_tokens: TokenBasedTrigger::DEFAULT_MINIMUM_PRUNE,
            threshold_p: ThresholdTrigger::DEFAULT_P,
        }
    }
}

/// Snapshot of how much of the context window a history currently fills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    pub current_tokens: u32,
    pub max_tokens: u32,
    pub usage_pct: f32,
    pub needs_compaction: bool,
    pub message_count: usize,
}

/// Result of running the full turn-preparation pipeline (spec §2): the
/// history the LLM should actually see, the tool subset selected for it,
/// and the usage snapshot the caller can surface to the user.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub history: History,
    pub selected_tools: Vec<Tool>,
    pub relevance_scores: HashMap<String, f32>,
    pub usage: ContextUsage,
}

/// Orchestrates the full context pipeline described in spec §2: tool-result
/// truncation, observation masking, compaction trigger + compactor, goal
/// reminder, scratchpad injection, tool retrieval, and prompt-cache hinting.
/// Owns the mutable cross-turn state (goal, scratchpad) behind locks so
/// `prepare_history` can take `&self` and be called from a shared `Arc`.
pub struct ContextOrchestrator {
    counter: Arc<dyn TokenCounter>,
    trigger: Box<dyn CompactionTrigger>,
    compactor: Box<dyn HistoryCompactor>,
    tool_result_compactor: Option<ToolResultCompactor>,
    observation_masker: Option<ObservationMasker>,
    goal_reminder: Mutex<GoalReminder>,
    scratchpad: Mutex<Scratchpad>,
    tool_retriever: Option<Box<dyn ToolRetriever>>,
    retriever_options: RetrieverOptions,
    cache_hints: CacheHintOptions,
    schema_compression: CompressionLevel,
}

impl ContextOrchestrator {
    /// Default wiring for a model: threshold trigger + head/tail compactor,
    /// tool-result compaction and observation masking both enabled, a
    /// keyword tool retriever, and cache hints on.
    pub fn for_model(
        model: impl Into<String>,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Result<Self, ConfigError> {
        Self::for_model_with_config(model, CompactionConfig::default(), summarizer)
    }

    /// Same as [`Self::for_model`], but with the trigger/compactor pair and
    /// per-turn stage toggles chosen by `config` (spec §4.15):
    /// `use_anchored_compaction` wins over `use_token_based_compaction`,
    /// which wins over the threshold+head/tail default.
    pub fn for_model_with_config(
        model: impl Into<String>,
        config: CompactionConfig,
        summarizer: Option<Arc<dyn Summarizer>>,
    ) -> Result<Self, ConfigError> {
        let counter: Arc<dyn TokenCounter> = Arc::new(BpeTokenCounter::new(model)?);

        let (trigger, compactor): (Box<dyn CompactionTrigger>, Box<dyn HistoryCompactor>) =
            if config.use_anchored_compaction {
                let mut c = AnchoredCompactor::new(counter.clone(), summarizer);
                c.protect_recent_tokens = config.protect_recent_tokens;
                (
                    Box::new(TokenBasedTrigger::new(
                        config.protect_recent_tokens,
                        config.minimum_prune_tokens,
                    )),
                    Box::new(c),
                )
            } else if config.use_token_based_compaction {
                let mut c = TokenBasedCompactor::new(counter.clone(), summarizer);
                c.protect_recent_tokens = config.protect_recent_tokens;
                c.minimum_prune_tokens = config.minimum_prune_tokens;
                (
                    Box::new(TokenBasedTrigger::new(
                        config.protect_recent_tokens,
                        config.minimum_prune_tokens,
                    )),
                    Box::new(c),
                )
            } else {
                (
                    Box::new(ThresholdTrigger::new(config.threshold_p)?),
                    Box::new(HeadTailCompactor::new(
                        counter.clone(),
                        summarizer,
                        HeadTailCompactor::DEFAULT_PRESERVE_TAIL_TURNS,
                    )),
                )
            };

        let tool_result_compactor = config
            .enable_tool_result_compaction
            .then(ToolResultCompactor::default);
        let observation_masker = config
            .enable_observation_masking
            .then(|| ObservationMasker::new(1, 2_000).expect("valid default configuration"));

        Ok(Self {
            counter,
            trigger,
            compactor,
            tool_result_compactor,
            observation_masker,
            goal_reminder: Mutex::new(GoalReminder::new()),
            scratchpad: Mutex::new(Scratchpad::new()),
            tool_retriever: Some(Box::new(KeywordRetriever::new())),
            retriever_options: RetrieverOptions::default(),
            cache_hints: CacheHintOptions::default(),
            schema_compression: CompressionLevel::None,
        })
    }

    pub fn with_tool_retriever(mut self, retriever: Box<dyn ToolRetriever>) -> Self {
        self.tool_retriever = Some(retriever);
        self
    }

    pub fn with_retriever_options(mut self, options: RetrieverOptions) -> Self {
        self.retriever_options = options;
        self
    }

    pub fn with_cache_hints(mut self, options: CacheHintOptions) -> Self {
        self.cache_hints = options;
        self
    }

    pub fn with_schema_compression(mut self, level: CompressionLevel) -> Self {
        self.schema_compression = level;
        self
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    pub fn get_usage(&self, history: &History) -> ContextUsage {
        let current_tokens = self.counter.count_messages(history);
        let max_tokens = self.counter.max_context_tokens();
        let usage_pct = if max_tokens == 0 {
            1.0
        } else {
            current_tokens as f32 / max_tokens as f32
        };
        ContextUsage {
            current_tokens,
            max_tokens,
            usage_pct,
            needs_compaction: self.trigger.should_compact(current_tokens, max_tokens),
            message_count: history.len(),
        }
    }

    pub fn should_compact(&self, history: &History) -> bool {
        let current = self.counter.count_messages(history);
        self.trigger.should_compact(current, self.counter.max_context_tokens())
    }

    /// Compacts to `floor(maxContextTokens * 0.70)` if the trigger fires;
    /// otherwise returns a no-op result carrying the input history.
    pub async fn compact_if_needed(&self, history: &History, cancel: &CancellationToken) -> CompactionResult {
        if !self.should_compact(history) {
            let tokens = self.counter.count_messages(history);
            return CompactionResult {
                compacted_history: history.clone(),
                original_tokens: tokens,
                compacted_tokens: tokens,
                messages_compacted: 0,
                compression_ratio: 1.0,
            };
        }
        let target = (self.counter.max_context_tokens() as f32 * COMPACTION_TARGET_FRACTION) as u32;
        self.compactor.compact(history, target, cancel).await
    }

    /// Forces compaction to an explicit target, bypassing the trigger.
    pub async fn compact(
        &self,
        history: &History,
        target_tokens: u32,
        cancel: &CancellationToken,
    ) -> CompactionResult {
        self.compactor.compact(history, target_tokens, cancel).await
    }

    pub async fn set_goal(&self, goal: impl Into<String>) {
        self.goal_reminder.lock().await.set_goal(goal);
    }

    pub async fn set_goal_from_history(&self, history: &History) {
        self.goal_reminder.lock().await.set_goal_from_first_user_message(history);
    }

    pub async fn add_scratchpad_observation(&self, observation: impl Into<String>) {
        self.scratchpad.lock().await.add_observation(observation);
    }

    pub async fn set_scratchpad_fact(&self, key: impl Into<String>, value: impl Into<String>) {
        self.scratchpad.lock().await.set_fact(key, value);
    }

    pub async fn clear_scratchpad(&self) {
        self.scratchpad.lock().await.clear();
    }

    /// Runs the full pipeline in spec §2 order and returns the history the
    /// LLM should see for this turn, plus the tool subset selected for it.
    ///
    /// Errors from the tool retriever (e.g. an embedding call failing)
    /// propagate rather than falling back to an empty tool selection.
    pub async fn prepare_history(
        &self,
        history: &History,
        available_tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<PreparedTurn, crate::memory::MemoryError> {
        let mut current = history.clone();

        if let Some(trc) = &self.tool_result_compactor {
            current = trc.apply(&current);
        }

        if let Some(masker) = &self.observation_masker {
            current = masker.apply(&current);
        }

        if self.should_compact(&current) {
            let target = (self.counter.max_context_tokens() as f32 * COMPACTION_TARGET_FRACTION) as u32;
            current = self.compactor.compact(&current, target, cancel).await.compacted_history;
        }

        {
            let reminder = self.goal_reminder.lock().await;
            current = reminder.inject_if_needed(&current);
        }

        {
            let scratchpad = self.scratchpad.lock().await;
            current = inject_scratchpad(&current, &scratchpad);
        }

        let retrieval = match &self.tool_retriever {
            Some(retriever) => {
                let query = last_user_text(&current);
                retriever
                    .retrieve(&query, available_tools, &self.retriever_options, cancel)
                    .await?
            }
            None => RetrievalResult {
                selected_tools: available_tools.to_vec(),
                relevance_scores: HashMap::new(),
            },
        };
        let selected_tools = compress_tools(&retrieval.selected_tools, self.schema_compression);

        current = apply_cache_hints(&current, self.counter.as_ref(), &self.cache_hints);

        let usage = self.get_usage(&current);
        Ok(PreparedTurn {
            history: current,
            selected_tools,
            relevance_scores: retrieval.relevance_scores,
            usage,
        })
    }
}

fn inject_scratchpad(history: &History, scratchpad: &Scratchpad) -> History {
    if !scratchpad.has_content() {
        return history.clone();
    }
    let mut out: Vec<ChatMessage> = history.iter().cloned().collect();
    out.push(ChatMessage::system(scratchpad.to_context_block()));
    history_from(out)
}

fn last_user_text(history: &[ChatMessage]) -> String {
    history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::message::{history_from, ContentItem, Role};

    fn sample_tools() -> Vec<Tool> {
        vec![Tool {
            name: "read_file".into(),
            description: Some("Read the contents of a file".into()),
            json_schema: serde_json::json!({"type": "object"}),
            is_function: true,
        }]
    }

    #[tokio::test]
    async fn for_model_rejects_empty_model_id() {
        assert!(ContextOrchestrator::for_model("", None).is_err());
    }

    #[tokio::test]
    async fn default_wiring_is_threshold_and_head_tail() {
        let orch = ContextOrchestrator::for_model("claude-sonnet-4", None).unwrap();
        let history = history_from(vec![ChatMessage::user("hello")]);
        assert!(!orch.should_compact(&history));
    }

    #[tokio::test]
    async fn anchored_config_selects_token_based_trigger() {
        let config = CompactionConfig {
            use_anchored_compaction: true,
            protect_recent_tokens: 10,
            minimum_prune_tokens: 1,
            ..Default::default()
        };
        let orch = ContextOrchestrator::for_model_with_config("claude-sonnet-4", config, None).unwrap();
        let usage = orch.get_usage(&history_from(vec![ChatMessage::user("hi")]));
        assert!(!usage.needs_compaction);
    }

    #[tokio::test]
    async fn prepare_history_injects_goal_reminder() {
        let orch = ContextOrchestrator::for_model("claude-sonnet-4", None)
            .unwrap()
            .with_tool_retriever(Box::new(KeywordRetriever::new()));
        orch.set_goal("ship the feature").await;

        let mut messages = vec![ChatMessage::user("start")];
        for i in 0..10 {
            messages.push(ChatMessage::user(format!("turn {i}")));
        }
        let history = history_from(messages);
        let prepared = orch
            .prepare_history(&history, &sample_tools(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(prepared
            .history
            .iter()
            .any(|m| m.text().contains("ship the feature")));
    }

    #[tokio::test]
    async fn prepare_history_injects_scratchpad_block() {
        let orch = ContextOrchestrator::for_model("claude-sonnet-4", None).unwrap();
        orch.add_scratchpad_observation("saw something interesting").await;

        let history = history_from(vec![ChatMessage::user("hi")]);
        let prepared = orch
            .prepare_history(&history, &sample_tools(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(prepared
            .history
            .iter()
            .any(|m| m.text().contains("[SCRATCHPAD]")));
    }

    #[tokio::test]
    async fn prepare_history_selects_tools_via_retriever() {
        let orch = ContextOrchestrator::for_model("claude-sonnet-4", None).unwrap();
        let history = history_from(vec![ChatMessage::user("please read a file")]);
        let prepared = orch
            .prepare_history(&history, &sample_tools(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(prepared.selected_tools[0].name, "read_file");
    }

    #[tokio::test]
    async fn forced_compact_uses_explicit_target() {
        let orch = ContextOrchestrator::for_model("claude-sonnet-4", None).unwrap();
        let mut messages = vec![ChatMessage::system("sys")];
        for i in 0..40 {
            messages.push(ChatMessage::new(
                Role::User,
                vec![ContentItem::Text(format!("message {i} with some padding words here"))],
            ));
        }
        let history = history_from(messages);
        let result = orch.compact(&history, 50, &CancellationToken::new()).await;
        assert!(result.compacted_tokens <= result.original_tokens);
    }
}
