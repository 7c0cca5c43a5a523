use std::sync::Arc;

use serde_json::{json, Map, Value};

/// Who sent a message. `Tool` is a distinct role in the internal history —
/// the wire-format adapters are responsible for folding it into whatever
/// shape a given provider expects (Anthropic puts tool results in `user`
/// messages; the conversion lives in [`to_wire_messages`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One piece of a message's content.
#[derive(Debug, Clone)]
pub enum ContentItem {
    Text(String),
    FunctionCall {
        call_id: String,
        name: String,
        arguments: Map<String, Value>,
    },
    /// `result` is opaque — callers may stash structured data in it. The
    /// pipeline only ever turns it into a string via [`ContentItem::result_as_string`].
    FunctionResult {
        call_id: String,
        result: Value,
    },
    /// Anything else (image references, thinking blocks, …). Only the
    /// approximate token cost matters to the pipeline.
    Other {
        kind: String,
        approx_tokens: u32,
    },
}

impl ContentItem {
    pub fn function_result(call_id: impl Into<String>, content: &str, is_error: bool) -> Self {
        ContentItem::FunctionResult {
            call_id: call_id.into(),
            result: json!({ "content": content, "is_error": is_error }),
        }
    }

    /// String form of a `FunctionResult`'s opaque result value, used for
    /// length checks (tool-result compaction, observation masking) and for
    /// serializing into wire messages.
    pub fn result_as_string(result: &Value) -> String {
        if let Some(s) = result.get("content").and_then(Value::as_str) {
            s.to_string()
        } else if let Some(s) = result.as_str() {
            s.to_string()
        } else {
            result.to_string()
        }
    }

    pub fn result_is_error(result: &Value) -> bool {
        result.get("is_error").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// A single chat message: a role, ordered content, and a free-form
/// additional-properties map (used by the prompt-cache hinting stage).
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentItem>,
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: Role, content: Vec<ContentItem>) -> Self {
        Self {
            role,
            content,
            extra: Map::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentItem::Text(text.into())])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentItem::Text(text.into())])
    }

    /// Concatenation of every `Text` content item, in order. Used by anchor
    /// extraction and error-code scanning, which operate on "the message's text".
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentItem::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn function_calls(&self) -> impl Iterator<Item = (&str, &str, &Map<String, Value>)> {
        self.content.iter().filter_map(|c| match c {
            ContentItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => Some((call_id.as_str(), name.as_str(), arguments)),
            _ => None,
        })
    }
}

/// The pipeline's shared history type. An `Arc` slice rather than a bare
/// `Vec` so stages that make no change can return the exact same
/// allocation (`Arc::ptr_eq`) instead of a merely value-equal clone —
/// spec invariant: tool-result compaction and observation masking are
/// idempotent and return the input reference when nothing changed.
pub type History = Arc<[ChatMessage]>;

pub fn history_from(messages: Vec<ChatMessage>) -> History {
    Arc::from(messages.into_boxed_slice())
}

/// Serialize a history into the Anthropic Messages API wire shape the
/// crate's `InferenceProvider` implementations already consume.
pub fn to_wire_messages(history: &[ChatMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len());
    for msg in history {
        match msg.role {
            Role::System => continue, // system messages go in `system`, not `messages`
            Role::User | Role::Tool => {
                let content: Vec<Value> = msg
                    .content
                    .iter()
                    .map(|c| match c {
                        ContentItem::Text(t) => json!({ "type": "text", "text": t }),
                        ContentItem::FunctionResult { call_id, result } => json!({
                            "type": "tool_result",
                            "tool_use_id": call_id,
                            "content": ContentItem::result_as_string(result),
                            "is_error": ContentItem::result_is_error(result),
                        }),
                        ContentItem::FunctionCall { call_id, name, arguments } => json!({
                            "type": "tool_use",
                            "id": call_id,
                            "name": name,
                            "input": arguments,
                        }),
                        ContentItem::Other { kind, .. } => json!({ "type": kind }),
                    })
                    .collect();
                out.push(wire_message("user", content, &msg.extra));
            }
            Role::Assistant => {
                let content: Vec<Value> = msg
                    .content
                    .iter()
                    .map(|c| match c {
                        ContentItem::Text(t) => json!({ "type": "text", "text": t }),
                        ContentItem::FunctionCall { call_id, name, arguments } => json!({
                            "type": "tool_use",
                            "id": call_id,
                            "name": name,
                            "input": arguments,
                        }),
                        ContentItem::FunctionResult { call_id, result } => json!({
                            "type": "tool_result",
                            "tool_use_id": call_id,
                            "content": ContentItem::result_as_string(result),
                        }),
                        ContentItem::Other { kind, .. } => json!({ "type": kind }),
                    })
                    .collect();
                out.push(wire_message("assistant", content, &msg.extra));
            }
        }
    }
    out
}

fn wire_message(role: &str, content: Vec<Value>, extra: &Map<String, Value>) -> Value {
    let mut v = json!({ "role": role, "content": content });
    if let Some(cache_control) = extra.get("cache_control") {
        v["cache_control"] = cache_control.clone();
    }
    v
}

/// System-message texts, in order — the one part of the wire format that
/// goes in the request's `system` field rather than `messages`.
pub fn system_texts(history: &[ChatMessage]) -> Vec<String> {
    history
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.text())
        .collect()
}
