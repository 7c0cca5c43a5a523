use std::sync::Arc;

use super::super::message::{history_from, ChatMessage, ContentItem, History, Role};
use super::super::ConfigError;

/// Head+tail truncation of individual oversize tool results. Cheap,
/// per-turn; runs before the trigger even measures whether a full
/// compaction round is needed.
pub struct ToolResultCompactor {
    pub max_result_chars: usize,
    pub keep_head_lines: usize,
    pub keep_tail_lines: usize,
}

impl ToolResultCompactor {
    pub const DEFAULT_MAX_RESULT_CHARS: usize = 30_000;
    pub const DEFAULT_KEEP_HEAD_LINES: usize = 50;
    pub const DEFAULT_KEEP_TAIL_LINES: usize = 20;

    pub fn new(
        max_result_chars: usize,
        keep_head_lines: usize,
        keep_tail_lines: usize,
    ) -> Result<Self, ConfigError> {
        if max_result_chars == 0 {
            return Err(ConfigError::new("max_result_chars must be > 0"));
        }
        Ok(Self {
            max_result_chars,
            keep_head_lines,
            keep_tail_lines,
        })
    }

    fn truncate_one(&self, r: &str) -> Option<String> {
        let len = r.len();
        if len <= self.max_result_chars {
            return None;
        }
        let lines: Vec<&str> = r.lines().collect();
        if lines.len() >= self.keep_head_lines + self.keep_tail_lines + 1 {
            let head = lines[..self.keep_head_lines].join("\n");
            let tail = lines[lines.len() - self.keep_tail_lines..].join("\n");
            let omitted = lines.len() - self.keep_head_lines - self.keep_tail_lines;
            Some(format!(
                "{head}\n[{omitted} lines omitted; {len} chars total]\n{tail}"
            ))
        } else {
            let head: String = r.chars().take(self.max_result_chars).collect();
            Some(format!("{head}[truncated; {len} chars total]"))
        }
    }

    /// Rewrites each tool message's `FunctionResult` items independently.
    /// Non-tool messages pass by reference. Returns the same `History`
    /// allocation if nothing changed (idempotence, spec invariant 6).
    pub fn apply(&self, history: &History) -> History {
        let mut changed = false;
        let mut out: Vec<ChatMessage> = Vec::with_capacity(history.len());

        for msg in history.iter() {
            if msg.role != Role::Tool {
                out.push(msg.clone());
                continue;
            }
            let mut msg_changed = false;
            let content: Vec<ContentItem> = msg
                .content
                .iter()
                .map(|item| match item {
                    ContentItem::FunctionResult { call_id, result } => {
                        let as_string = ContentItem::result_as_string(result);
                        match self.truncate_one(&as_string) {
                            Some(truncated) => {
                                msg_changed = true;
                                ContentItem::function_result(
                                    call_id.clone(),
                                    &truncated,
                                    ContentItem::result_is_error(result),
                                )
                            }
                            None => item.clone(),
                        }
                    }
                    other => other.clone(),
                })
                .collect();

            if msg_changed {
                changed = true;
                out.push(ChatMessage {
                    role: msg.role,
                    content,
                    extra: msg.extra.clone(),
                });
            } else {
                out.push(msg.clone());
            }
        }

        if changed {
            history_from(out)
        } else {
            Arc::clone(history)
        }
    }
}

impl Default for ToolResultCompactor {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_RESULT_CHARS,
            Self::DEFAULT_KEEP_HEAD_LINES,
            Self::DEFAULT_KEEP_TAIL_LINES,
        )
        .expect("default configuration is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_message(call_id: &str, content: &str) -> ChatMessage {
        ChatMessage::new(
            Role::Tool,
            vec![ContentItem::function_result(call_id, content, false)],
        )
    }

    #[test]
    fn rejects_zero_max_chars() {
        assert!(ToolResultCompactor::new(0, 10, 10).is_err());
    }

    #[test]
    fn leaves_small_results_unchanged() {
        let c = ToolResultCompactor::default();
        let history = history_from(vec![tool_message("c1", "short result")]);
        let out = c.apply(&history);
        assert!(Arc::ptr_eq(&history, &out));
    }

    #[test]
    fn head_tail_truncation_preserves_call_id() {
        let c = ToolResultCompactor::new(50, 2, 2).unwrap();
        let lines: Vec<String> = (0..10).map(|i| format!("line {i}")).collect();
        let big = lines.join("\n");
        let history = history_from(vec![tool_message("call_42", &big)]);
        let out = c.apply(&history);
        assert!(!Arc::ptr_eq(&history, &out));
        if let ContentItem::FunctionResult { call_id, result } = &out[0].content[0] {
            assert_eq!(call_id, "call_42");
            let s = ContentItem::result_as_string(result);
            assert!(s.contains("lines omitted"));
            assert!(s.starts_with("line 0\nline 1"));
            assert!(s.ends_with("line 8\nline 9"));
        } else {
            panic!("expected FunctionResult");
        }
    }

    #[test]
    fn character_truncation_when_too_few_lines() {
        let c = ToolResultCompactor::new(10, 50, 20).unwrap();
        let big = "x".repeat(100);
        let history = history_from(vec![tool_message("c1", &big)]);
        let out = c.apply(&history);
        if let ContentItem::FunctionResult { result, .. } = &out[0].content[0] {
            let s = ContentItem::result_as_string(result);
            assert!(s.contains("[truncated; 100 chars total]"));
        } else {
            panic!("expected FunctionResult");
        }
    }

    #[test]
    fn idempotent_second_pass_same_reference() {
        let c = ToolResultCompactor::new(50, 2, 2).unwrap();
        let big = (0..10)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let history = history_from(vec![tool_message("c1", &big)]);
        let once = c.apply(&history);
        let twice = c.apply(&once);
        assert!(Arc::ptr_eq(&once, &twice));
    }

    #[test]
    fn non_tool_messages_pass_through() {
        let c = ToolResultCompactor::default();
        let history = history_from(vec![ChatMessage::user("hello")]);
        let out = c.apply(&history);
        assert!(Arc::ptr_eq(&history, &out));
    }
}
