use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::SummarizeError;
use crate::inference::InferenceProvider;
use crate::types::InferenceRequest;

/// One-method LLM call used by the compactors that summarize a prunable
/// middle region. Kept separate from [`InferenceProvider`] so a compactor
/// only needs "give me a summary", not the whole request-building surface.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        prompt: &str,
        max_output_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String, SummarizeError>;
}

/// Adapts any `InferenceProvider` into a `Summarizer`, so compactors can
/// drive a real provider (Anthropic, Ollama, OpenAI) without depending on
/// the transport trait directly.
pub struct InferenceSummarizer {
    provider: Arc<dyn InferenceProvider>,
    model: String,
}

impl InferenceSummarizer {
    pub fn new(provider: Arc<dyn InferenceProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Summarizer for InferenceSummarizer {
    async fn summarize(
        &self,
        prompt: &str,
        max_output_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<String, SummarizeError> {
        if cancel.is_cancelled() {
            return Err(SummarizeError::Cancelled);
        }
        let request = InferenceRequest {
            model: self.model.clone(),
            max_tokens: max_output_tokens.max(1),
            system: None,
            tools: vec![],
            messages: vec![serde_json::json!({ "role": "user", "content": prompt })],
            thinking: None,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SummarizeError::Cancelled),
            r = self.provider.infer(request) => r,
        };

        match result {
            Ok(response) => {
                let text = response
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        crate::types::ContentBlock::Text(t) => Some(t.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(text)
            }
            Err(e) => {
                warn!(error = %e, "summarization call failed");
                Err(SummarizeError::Request(e.to_string()))
            }
        }
    }
}
