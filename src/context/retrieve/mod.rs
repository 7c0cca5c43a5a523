pub mod embedding;
pub mod keyword;

pub use embedding::EmbeddingRetriever;
pub use keyword::KeywordRetriever;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::tools::Tool;

/// Options shared by every retriever variant.
#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    pub always_include: Vec<String>,
    pub max_tools: usize,
    pub min_relevance_score: f32,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            always_include: Vec::new(),
            max_tools: 10,
            min_relevance_score: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub selected_tools: Vec<Tool>,
    pub relevance_scores: HashMap<String, f32>,
}

/// Narrows the tool set exposed to the model for a single turn.
///
/// Errors propagate to the caller rather than being swallowed — a retriever
/// that fails to score tools (e.g. an embedding call errored) leaves its
/// index unchanged and reports the failure instead of silently falling back
/// to an empty-scored selection.
#[async_trait]
pub trait ToolRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        available_tools: &[Tool],
        options: &RetrieverOptions,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult, crate::memory::MemoryError>;
}

/// Tokenizes on the fixed separator set, then splits camelCase/PascalCase
/// boundaries, keeping only tokens of length >= 2. Shared by both retriever
/// variants' name/description handling where applicable.
pub fn tokenize(text: &str) -> Vec<String> {
    const SEPARATORS: &[char] = &[' ', '_', '-', '.', ',', '/', '(', ')', '[', ']', '{', '}', ':', ';', '"'];

    let mut tokens = Vec::new();
    for chunk in text.split(|c: char| SEPARATORS.contains(&c)) {
        if chunk.is_empty() {
            continue;
        }
        let mut current = String::new();
        let mut prev_is_upper = false;
        for (i, ch) in chunk.chars().enumerate() {
            let is_upper = ch.is_uppercase();
            if i > 0 && is_upper && !prev_is_upper {
                if current.len() >= 2 {
                    tokens.push(current.to_lowercase());
                }
                current = String::new();
            }
            current.push(ch);
            prev_is_upper = is_upper;
        }
        if current.len() >= 2 {
            tokens.push(current.to_lowercase());
        }
    }
    tokens
}

/// Shared selection policy (spec §4.11/§4.12): always-include tools first,
/// then score-descending, ties broken by natural (original list) order,
/// stopping at `max_tools` or the first score below `min_relevance_score`.
/// When `query_is_empty`, only always-include tools are returned — an
/// empty query never pulls in tools by score.
pub fn select_by_score(
    available_tools: &[Tool],
    scores: &HashMap<String, f32>,
    options: &RetrieverOptions,
    query_is_empty: bool,
) -> RetrievalResult {
    if available_tools.is_empty() {
        return RetrievalResult::default();
    }

    let mut selected: Vec<Tool> = Vec::new();
    let mut selected_names = std::collections::HashSet::new();
    let mut relevance_scores = HashMap::new();

    for name in &options.always_include {
        if selected.len() >= options.max_tools {
            break;
        }
        if let Some(tool) = available_tools.iter().find(|t| &t.name == name) {
            if selected_names.insert(tool.name.clone()) {
                selected.push(tool.clone());
                relevance_scores.insert(tool.name.clone(), 1.0);
            }
        }
    }

    if query_is_empty {
        return RetrievalResult {
            selected_tools: selected,
            relevance_scores,
        };
    }

    let mut ranked: Vec<(usize, &Tool, f32)> = available_tools
        .iter()
        .enumerate()
        .filter(|(_, t)| !selected_names.contains(&t.name))
        .map(|(idx, t)| (idx, t, *scores.get(&t.name).unwrap_or(&0.0)))
        .collect();
    ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap().then(a.0.cmp(&b.0)));

    for (_, tool, score) in ranked {
        if selected.len() >= options.max_tools || score < options.min_relevance_score {
            break;
        }
        selected_names.insert(tool.name.clone());
        relevance_scores.insert(tool.name.clone(), score);
        selected.push(tool.clone());
    }

    RetrievalResult {
        selected_tools: selected,
        relevance_scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_camel_case() {
        let tokens = tokenize("ExecuteCommand");
        assert_eq!(tokens, vec!["execute", "command"]);
    }

    #[test]
    fn tokenize_drops_single_char_tokens() {
        let tokens = tokenize("a read_file b");
        assert_eq!(tokens, vec!["read", "file"]);
    }

    #[test]
    fn tokenize_splits_on_separators() {
        let tokens = tokenize("path/to/file.rs");
        assert_eq!(tokens, vec!["path", "to", "file", "rs"]);
    }
}
