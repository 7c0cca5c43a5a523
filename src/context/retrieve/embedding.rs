use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{select_by_score, RetrievalResult, RetrieverOptions, ToolRetriever};
use crate::memory::EmbeddingProvider;
use crate::tools::Tool;

struct Index {
    /// Tool names in the order they were indexed — used as the "tool list
    /// identity" signature that triggers a rebuild when it changes, since
    /// the slices passed in per call aren't individually addressable.
    signature: Vec<String>,
    vectors: HashMap<String, Vec<f32>>,
}

/// Scores tools by cosine similarity between a query embedding and each
/// tool's cached `"<name>: <description>"` embedding. The index is rebuilt
/// lazily and only when the tool list's identity changes.
pub struct EmbeddingRetriever {
    provider: Arc<dyn EmbeddingProvider>,
    index: RwLock<Option<Index>>,
}

impl EmbeddingRetriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            index: RwLock::new(None),
        }
    }

    fn signature_of(tools: &[Tool]) -> Vec<String> {
        tools.iter().map(|t| t.name.clone()).collect()
    }

    async fn ensure_index(&self, tools: &[Tool]) -> Result<(), crate::memory::MemoryError> {
        let signature = Self::signature_of(tools);
        {
            let guard = self.index.read().await;
            if let Some(index) = guard.as_ref() {
                if index.signature == signature {
                    return Ok(());
                }
            }
        }

        let texts: Vec<String> = tools
            .iter()
            .map(|t| format!("{}: {}", t.name, t.description.as_deref().unwrap_or("")))
            .collect();
        let embeddings = self.provider.embed_batch(&texts).await?;

        let mut vectors = HashMap::new();
        for (tool, vector) in tools.iter().zip(embeddings.into_iter()) {
            vectors.insert(tool.name.clone(), vector);
        }

        let mut guard = self.index.write().await;
        *guard = Some(Index { signature, vectors });
        Ok(())
    }
}

/// Cosine similarity remapped from [-1,1] to [0,1]. Degenerate vectors
/// (unequal length, zero norm) score 0.
pub fn cosine_similarity_unit(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    (cosine + 1.0) / 2.0
}

#[async_trait]
impl ToolRetriever for EmbeddingRetriever {
    async fn retrieve(
        &self,
        query: &str,
        available_tools: &[Tool],
        options: &RetrieverOptions,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult, crate::memory::MemoryError> {
        if available_tools.is_empty() {
            return Ok(RetrievalResult::default());
        }
        let query_is_empty = query.trim().is_empty();
        if query_is_empty {
            return Ok(select_by_score(available_tools, &HashMap::new(), options, true));
        }

        // Embedding failures propagate to the caller; the index is left as
        // it was before this call (ensure_index only publishes on success).
        self.ensure_index(available_tools).await?;
        let query_vector = self.provider.embed(query).await?;

        if cancel.is_cancelled() {
            return Ok(select_by_score(available_tools, &HashMap::new(), options, true));
        }

        let guard = self.index.read().await;
        let index = guard.as_ref().expect("index populated by ensure_index");
        let scores: HashMap<String, f32> = available_tools
            .iter()
            .map(|t| {
                let score = index
                    .vectors
                    .get(&t.name)
                    .map(|v| cosine_similarity_unit(&query_vector, v))
                    .unwrap_or(0.0);
                (t.name.clone(), score)
            })
            .collect();
        drop(guard);

        Ok(select_by_score(available_tools, &scores, options, false))
    }
}
