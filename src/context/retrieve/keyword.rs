use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{select_by_score, tokenize, RetrievalResult, RetrieverOptions, ToolRetriever};
use crate::tools::Tool;

/// Scores tools by tokenized name/description overlap with the query —
/// cheap, no external dependency, good enough when a query's vocabulary
/// overlaps a tool's name or description directly.
pub struct KeywordRetriever;

impl KeywordRetriever {
    pub fn new() -> Self {
        Self
    }

    fn score_tool(query_tokens: &[String], tool: &Tool) -> f32 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let name_tokens = tokenize(&tool.name);
        let desc_tokens = tool
            .description
            .as_deref()
            .map(tokenize)
            .unwrap_or_default();

        let name_hits = query_tokens
            .iter()
            .filter(|q| {
                name_tokens
                    .iter()
                    .any(|n| n.contains(q.as_str()) || q.contains(n.as_str()))
            })
            .count();
        let desc_hits = query_tokens.iter().filter(|q| desc_tokens.contains(q)).count();

        let score = (3.0 * name_hits as f32 + desc_hits as f32) / (query_tokens.len() as f32 * 4.0);
        score.clamp(0.0, 1.0)
    }
}

impl Default for KeywordRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRetriever for KeywordRetriever {
    async fn retrieve(
        &self,
        query: &str,
        available_tools: &[Tool],
        options: &RetrieverOptions,
        _cancel: &CancellationToken,
    ) -> Result<RetrievalResult, crate::memory::MemoryError> {
        let query_tokens = tokenize(query);
        let query_is_empty = query_tokens.is_empty();

        let scores: HashMap<String, f32> = available_tools
            .iter()
            .map(|t| (t.name.clone(), Self::score_tool(&query_tokens, t)))
            .collect();

        Ok(select_by_score(available_tools, &scores, options, query_is_empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: Some(description.to_string()),
            json_schema: json!({}),
            is_function: true,
        }
    }

    fn sample_tools() -> Vec<Tool> {
        vec![
            tool("ReadFile", "Read the contents of a file"),
            tool("WriteFile", "Write content to a file"),
            tool("ListDirectory", "List files in a directory"),
            tool("GrepFiles", "Search file contents with a pattern"),
            tool("ExecuteCommand", "Run a shell command"),
        ]
    }

    #[tokio::test]
    async fn scenario_f_ranks_execute_command_top() {
        let retriever = KeywordRetriever::new();
        let tools = sample_tools();
        let result = retriever
            .retrieve(
                "execute command shell",
                &tools,
                &RetrieverOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.selected_tools[0].name, "ExecuteCommand");
    }

    #[tokio::test]
    async fn scenario_f_empty_query_returns_only_always_include() {
        let retriever = KeywordRetriever::new();
        let tools = sample_tools();
        let options = RetrieverOptions {
            always_include: vec!["ReadFile".to_string()],
            ..Default::default()
        };
        let result = retriever
            .retrieve("", &tools, &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.selected_tools.len(), 1);
        assert_eq!(result.selected_tools[0].name, "ReadFile");
        assert_eq!(result.relevance_scores["ReadFile"], 1.0);
    }

    #[tokio::test]
    async fn invariant_9_scores_in_unit_range() {
        let retriever = KeywordRetriever::new();
        let tools = sample_tools();
        let result = retriever
            .retrieve(
                "read write list grep execute",
                &tools,
                &RetrieverOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        for score in result.relevance_scores.values() {
            assert!(*score >= 0.0 && *score <= 1.0);
        }
    }

    #[tokio::test]
    async fn empty_tool_list_returns_empty() {
        let retriever = KeywordRetriever::new();
        let result = retriever
            .retrieve("anything", &[], &RetrieverOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.selected_tools.is_empty());
    }
}
