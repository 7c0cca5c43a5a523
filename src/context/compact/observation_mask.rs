use std::collections::HashMap;
use std::sync::Arc;

use super::super::message::{history_from, ChatMessage, ContentItem, History, Role};
use super::super::ConfigError;

/// Compresses **old** tool observations to placeholders while leaving
/// recent ones verbatim, so the model keeps working memory of recent tool
/// output without paying for every byte of stale output.
pub struct ObservationMasker {
    pub protected_turns: i64,
    pub minimum_result_length: i64,
}

impl ObservationMasker {
    pub fn new(protected_turns: i64, minimum_result_length: i64) -> Result<Self, ConfigError> {
        if protected_turns < 0 {
            return Err(ConfigError::new("protected_turns must be >= 0"));
        }
        if minimum_result_length < 0 {
            return Err(ConfigError::new("minimum_result_length must be >= 0"));
        }
        Ok(Self {
            protected_turns,
            minimum_result_length,
        })
    }

    /// Index of the earliest user message within the last `protected_turns`
    /// user turns, counting from the end. `None` means "protect everything"
    /// (fewer than `protected_turns` user messages exist).
    fn protected_start_index(&self, history: &[ChatMessage]) -> Option<usize> {
        let mut seen = 0i64;
        for (idx, msg) in history.iter().enumerate().rev() {
            if msg.role == Role::User {
                seen += 1;
                if seen == self.protected_turns {
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Applies masking. Returns the same `History` allocation if nothing
    /// changed (idempotence, spec invariant 5).
    pub fn apply(&self, history: &History) -> History {
        let boundary = match self.protected_start_index(history) {
            Some(idx) => idx,
            None => return Arc::clone(history),
        };

        let mut call_id_to_tool: HashMap<String, String> = HashMap::new();
        for msg in history.iter() {
            if msg.role == Role::Assistant {
                for (call_id, name, _) in msg.function_calls() {
                    call_id_to_tool.insert(call_id.to_string(), name.to_string());
                }
            }
        }

        let mut changed = false;
        let mut out: Vec<ChatMessage> = Vec::with_capacity(history.len());

        for (idx, msg) in history.iter().enumerate() {
            if idx >= boundary || msg.role != Role::Tool {
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
                        if (as_string.len() as i64) < self.minimum_result_length {
                            return item.clone();
                        }
                        msg_changed = true;
                        let tool = call_id_to_tool
                            .get(call_id.as_str())
                            .map(String::as_str)
                            .unwrap_or("unknown");
                        let lines = as_string.matches('\n').count() + 1;
                        let placeholder = format!(
                            "[Masked: {tool}, {} chars, ~{lines} lines]",
                            as_string.len()
                        );
                        ContentItem::function_result(
                            call_id.clone(),
                            &placeholder,
                            ContentItem::result_is_error(result),
                        )
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

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_call(call_id: &str, tool: &str) -> ChatMessage {
        ChatMessage::new(
            Role::Assistant,
            vec![ContentItem::FunctionCall {
                call_id: call_id.into(),
                name: tool.into(),
                arguments: Default::default(),
            }],
        )
    }

    fn tool_result(call_id: &str, content: &str) -> ChatMessage {
        ChatMessage::new(
            Role::Tool,
            vec![ContentItem::function_result(call_id, content, false)],
        )
    }

    #[test]
    fn rejects_negative_config() {
        assert!(ObservationMasker::new(-1, 10).is_err());
        assert!(ObservationMasker::new(1, -10).is_err());
    }

    #[test]
    fn scenario_c_masks_oversize_old_result() {
        let masker = ObservationMasker::new(1, 200).unwrap();
        let content = "x".repeat(300);
        let history = history_from(vec![
            assistant_call("c1", "grep"),
            tool_result("c1", &content),
            ChatMessage::user("final question"),
            ChatMessage::new(Role::Assistant, vec![ContentItem::Text("answer".into())]),
        ]);
        let out = masker.apply(&history);
        if let ContentItem::FunctionResult { call_id, result } = &out[1].content[0] {
            assert_eq!(call_id, "c1");
            let s = ContentItem::result_as_string(result);
            assert_eq!(s, "[Masked: grep, 300 chars, ~1 lines]");
        } else {
            panic!("expected FunctionResult");
        }
    }

    #[test]
    fn scenario_c_below_threshold_is_unchanged() {
        let masker = ObservationMasker::new(1, 200).unwrap();
        let content = "x".repeat(50);
        let history = history_from(vec![
            assistant_call("c1", "grep"),
            tool_result("c1", &content),
            ChatMessage::user("final question"),
        ]);
        let out = masker.apply(&history);
        assert!(Arc::ptr_eq(&history, &out));
    }

    #[test]
    fn protects_everything_when_not_enough_user_turns() {
        let masker = ObservationMasker::new(5, 10).unwrap();
        let history = history_from(vec![
            assistant_call("c1", "grep"),
            tool_result("c1", &"x".repeat(500)),
            ChatMessage::user("only one user turn"),
        ]);
        let out = masker.apply(&history);
        assert!(Arc::ptr_eq(&history, &out));
    }

    #[test]
    fn idempotent_second_pass_same_reference() {
        let masker = ObservationMasker::new(1, 200).unwrap();
        let history = history_from(vec![
            assistant_call("c1", "grep"),
            tool_result("c1", &"x".repeat(300)),
            ChatMessage::user("final question"),
        ]);
        let once = masker.apply(&history);
        let twice = masker.apply(&once);
        assert!(Arc::ptr_eq(&once, &twice));
    }
}
