pub mod context;
pub mod decorator;
pub mod error;
pub mod events;
pub mod inference;
pub mod memory;
pub mod session;
pub mod tools;
pub mod types;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use context::{
    estimate_str_tokens, estimate_tokens, ContextManager, ManagedContextManager, TokenBudget,
};
pub use error::{AgentError, InferenceError};
pub use events::AgentEvent;
pub use inference::{AnthropicProvider, InferenceProvider, OllamaProvider, OpenAiProvider};
pub use session::{FileSessionManager, NoSessionManager, SessionManager, SessionState};
pub use decorator::{
    redaction::RedactionTransform, source_tag::SourceTagTransform, Decoration, DecoratorError,
    ToolDecorator, ToolTransform,
};
pub use tools::{ToolHandler, ToolPipeline, ToolRegistry};
pub use types::{ContentBlock, InferenceRequest, InferenceResponse, StopReason, Usage};

/// Agent configuration.
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_turns: usize,
    pub session_id: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 4096,
            max_turns: 20,
            session_id: None,
        }
    }
}

/// Result of an agent invocation.
#[derive(Debug)]
pub struct AgentResult {
    pub text: String,
    pub turns: usize,
    pub usage: Usage,
}

/// The agent. Wire up a provider, context manager, tools, and go.
pub struct Agent {
    provider: Box<dyn InferenceProvider>,
    context: Box<dyn ContextManager>,
    session: Box<dyn SessionManager>,
    tools: ToolPipeline,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        provider: impl InferenceProvider + 'static,
        context: impl ContextManager + 'static,
        tools: ToolPipeline,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider: Box::new(provider),
            context: Box::new(context),
            session: Box::new(NoSessionManager),
            tools,
            config,
        }
    }

    pub fn with_session(mut self, session: impl SessionManager + 'static) -> Self {
        self.session = Box::new(session);
        self
    }

    /// Simple invocation. Runs until the model stops or max turns is reached.
    pub async fn invoke(&mut self, prompt: &str) -> Result<AgentResult, AgentError> {
        self.context.add_prompt(prompt);
        self.run_loop(0, None, None).await
    }

    /// Invocation with cancellation support.
    pub async fn invoke_with_cancel(
        &mut self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<AgentResult, AgentError> {
        self.context.add_prompt(prompt);
        self.run_loop(0, Some(cancel), None).await
    }

    /// Invocation with streaming events.
    pub async fn invoke_streaming(
        &mut self,
        prompt: &str,
        tx: tokio::sync::mpsc::Sender<AgentEvent>,
    ) -> Result<AgentResult, AgentError> {
        self.context.add_prompt(prompt);
        self.run_loop(0, None, Some(tx)).await
    }

    /// Resume from a previously checkpointed session.
    pub async fn resume(&mut self, session_id: &str) -> Result<Option<AgentResult>, AgentError> {
        if let Some(state) = self.session.load(session_id).await? {
            self.context.restore(&state.context_snapshot)?;
            self.config.session_id = Some(session_id.to_string());
            let result = self.run_loop(state.turn + 1, None, None).await?;
            Ok(Some(result))
        } else {
            Ok(None)
        }
    }

    async fn run_loop(
        &mut self,
        start_turn: usize,
        cancel: Option<CancellationToken>,
        tx: Option<tokio::sync::mpsc::Sender<AgentEvent>>,
    ) -> Result<AgentResult, AgentError> {
        let mut total_usage = Usage::default();
        let mut final_text = String::new();

        for turn in start_turn..self.config.max_turns {
            // Check cancellation
            if let Some(ref cancel) = cancel {
                if cancel.is_cancelled() {
                    info!(turn, "agent cancelled");
                    return Err(AgentError::Cancelled);
                }
            }

            if let Some(ref tx) = tx {
                let _ = tx.send(AgentEvent::TurnStart { turn }).await;
            }

            // Auto-compaction: if context is approaching limits, summarize
            if self.context.needs_compaction() {
                if let Some(compact_req) = self.context.build_compaction_request() {
                    info!(turn, "running auto-compaction");
                    let pre_tokens = context::estimate_tokens(
                        &serde_json::Value::Array(
                            self.context.build_request().messages,
                        ),
                    );
                    match self.provider.infer(compact_req).await {
                        Ok(summary_resp) => {
                            let summary_text = summary_resp
                                .content
                                .iter()
                                .filter_map(|b| {
                                    if let ContentBlock::Text(t) = b { Some(t.as_str()) } else { None }
                                })
                                .collect::<Vec<_>>()
                                .join("\n");
                            self.context.compact(&summary_text);
                            let post_tokens = context::estimate_tokens(
                                &serde_json::Value::Array(
                                    self.context.build_request().messages,
                                ),
                            );
                            total_usage.accumulate(&summary_resp.usage);
                            info!(pre_tokens, post_tokens, "auto-compaction complete");
                            if let Some(ref tx) = tx {
                                let _ = tx
                                    .send(AgentEvent::Compacted {
                                        pre_tokens,
                                        post_tokens,
                                    })
                                    .await;
                            }
                        }
                        Err(e) => {
                            warn!(?e, "auto-compaction failed, continuing without it");
                        }
                    }
                }
            }

            info!(turn, "agent turn");

            // Build and send inference request
            let request = self.context.build_request();
            let response = if let Some(ref cancel) = cancel {
                tokio::select! {
                    result = self.provider.infer(request) => result?,
                    _ = cancel.cancelled() => {
                        info!(turn, "agent cancelled during inference");
                        return Err(AgentError::Cancelled);
                    }
                }
            } else {
                self.provider.infer(request).await?
            };

            total_usage.accumulate(&response.usage);
            self.context.record_response(&response);

            // Extract text from content blocks
            for block in &response.content {
                if let ContentBlock::Text(text) = block {
                    final_text = text.clone();
                    if let Some(ref tx) = tx {
                        let _ = tx
                            .send(AgentEvent::Text {
                                content: text.clone(),
                            })
                            .await;
                    }
                }
            }

            match response.stop_reason {
                StopReason::EndTurn => {
                    if let Some(ref tx) = tx {
                        let _ = tx.send(AgentEvent::Finished { turns: turn + 1 }).await;
                    }
                    info!(turns = turn + 1, "agent finished");
                    return Ok(AgentResult {
                        text: final_text,
                        turns: turn + 1,
                        usage: total_usage,
                    });
                }
                StopReason::ToolUse => {
                    for block in &response.content {
                        if let ContentBlock::ToolUse { id, name, input } = block {
                            if let Some(ref tx) = tx {
                                let _ = tx
                                    .send(AgentEvent::ToolCall {
                                        name: name.clone(),
                                        input: input.clone(),
                                    })
                                    .await;
                            }

                            let result = self.tools.execute(name, input).await;
                            let (output, is_err) = match &result {
                                Ok(s) => (s.as_str(), false),
                                Err(s) => (s.as_str(), true),
                            };

                            if let Some(ref tx) = tx {
                                let _ = tx
                                    .send(AgentEvent::ToolResult {
                                        name: name.clone(),
                                        output: output.to_string(),
                                        is_error: is_err,
                                    })
                                    .await;
                            }

                            self.context.record_tool_result(id, name, output, is_err);
                        }
                    }
                }
                StopReason::MaxTokens => {
                    info!(turn, "response truncated, continuing");
                }
            }

            // Checkpoint after each turn
            if let Some(ref sid) = self.config.session_id {
                let state = SessionState {
                    turn,
                    context_snapshot: self.context.snapshot(),
                    pending_tool_calls: vec![],
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                };
                self.session.checkpoint(sid, &state).await?;
            }
        }

        warn!(
            max_turns = self.config.max_turns,
            "agent hit max turns limit"
        );
        if let Some(ref tx) = tx {
            let _ = tx
                .send(AgentEvent::Finished {
                    turns: self.config.max_turns,
                })
                .await;
        }
        Ok(AgentResult {
            text: final_text,
            turns: self.config.max_turns,
            usage: total_usage,
        })
    }
}
