use serde_json::{Map, Value};

use crate::tools::Tool;

const TOOL_DESC_BUDGET: usize = 100;
const SCHEMA_ROOT_DESC_BUDGET: usize = 120;
const PROPERTY_DESC_BUDGET: usize = 80;

/// How aggressively to shrink a tool's description and JSON schema before it
/// goes into the request. Applied per turn, after retrieval narrows the set
/// — compressing a tool that didn't make the cut would be wasted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Passthrough: tool is sent exactly as registered.
    None,
    /// Truncates descriptions to a fixed budget per level, drops `examples`.
    Moderate,
    /// Strips every `description`/`examples`/`default`, keeping only the
    /// fields that constrain what the model may pass: `type`, `required`,
    /// `properties`, `items`.
    Aggressive,
}

/// Shrinks a tool's `description` and `json_schema` for the wire request.
/// The tool's identity (`name`) and invocation behavior are untouched —
/// only the surface the model reads before calling it changes.
pub fn compress_tool(tool: &Tool, level: CompressionLevel) -> Tool {
    match level {
        CompressionLevel::None => tool.clone(),
        CompressionLevel::Moderate => Tool {
            name: tool.name.clone(),
            description: tool
                .description
                .as_deref()
                .map(|d| truncate(d, TOOL_DESC_BUDGET)),
            json_schema: compress_schema_moderate(&tool.json_schema, true),
            is_function: tool.is_function,
        },
        CompressionLevel::Aggressive => Tool {
            name: tool.name.clone(),
            description: None,
            json_schema: compress_schema_aggressive(&tool.json_schema),
            is_function: tool.is_function,
        },
    }
}

pub fn compress_tools(tools: &[Tool], level: CompressionLevel) -> Vec<Tool> {
    tools.iter().map(|t| compress_tool(t, level)).collect()
}

/// Truncates `s` to at most `budget` chars, preferring to cut at the last
/// sentence boundary past the halfway point, then the last word boundary,
/// and only hard-cutting as a last resort. Always appends `"..."` when
/// anything was removed.
fn truncate(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let half = budget / 2;
    let window: String = chars[..budget].iter().collect();

    if let Some(last_dot) = window.rfind('.') {
        if last_dot >= half {
            return format!("{}...", &window[..=last_dot]);
        }
    }
    if let Some(last_space) = window.rfind(' ') {
        return format!("{}...", window[..last_space].trim_end());
    }
    format!("{window}...")
}

fn compress_schema_moderate(schema: &Value, is_root: bool) -> Value {
    let Value::Object(obj) = schema else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        match key.as_str() {
            "description" => {
                let budget = if is_root {
                    SCHEMA_ROOT_DESC_BUDGET
                } else {
                    PROPERTY_DESC_BUDGET
                };
                if let Some(s) = value.as_str() {
                    out.insert(key.clone(), Value::String(truncate(s, budget)));
                }
            }
            "examples" => continue,
            "properties" => {
                if let Value::Object(props) = value {
                    let mut compressed_props = Map::new();
                    for (prop_name, prop_schema) in props {
                        compressed_props.insert(
                            prop_name.clone(),
                            compress_schema_moderate(prop_schema, false),
                        );
                    }
                    out.insert(key.clone(), Value::Object(compressed_props));
                } else {
                    out.insert(key.clone(), value.clone());
                }
            }
            "items" => {
                out.insert(key.clone(), compress_schema_moderate(value, false));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(out)
}

fn compress_schema_aggressive(schema: &Value) -> Value {
    const KEPT: &[&str] = &["type", "required", "properties", "items"];

    let Value::Object(obj) = schema else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        if !KEPT.contains(&key.as_str()) {
            continue; // drops description, examples, default, and anything else
        }
        match key.as_str() {
            "properties" => {
                if let Value::Object(props) = value {
                    let mut compressed_props = Map::new();
                    for (prop_name, prop_schema) in props {
                        compressed_props.insert(prop_name.clone(), compress_schema_aggressive(prop_schema));
                    }
                    out.insert(key.clone(), Value::Object(compressed_props));
                } else {
                    out.insert(key.clone(), value.clone());
                }
            }
            "items" => {
                out.insert(key.clone(), compress_schema_aggressive(value));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tool() -> Tool {
        Tool {
            name: "write_file".into(),
            description: Some("Write content to a file, creating it if needed and overwriting any existing content at that path".into()),
            json_schema: json!({
                "type": "object",
                "description": "Arguments for writing a file to disk at a given path with given content",
                "properties": {
                    "path": {"type": "string", "description": "The absolute path of the file to write", "examples": ["/tmp/a.txt"]},
                    "content": {"type": "string", "description": "The content to write", "default": ""},
                },
                "required": ["path", "content"],
            }),
            is_function: true,
        }
    }

    #[test]
    fn none_is_passthrough() {
        let tool = sample_tool();
        let compressed = compress_tool(&tool, CompressionLevel::None);
        assert_eq!(compressed.description, tool.description);
        assert_eq!(compressed.json_schema, tool.json_schema);
    }

    #[test]
    fn moderate_truncates_and_drops_examples() {
        let tool = sample_tool();
        let compressed = compress_tool(&tool, CompressionLevel::Moderate);
        assert!(compressed.description.as_ref().unwrap().chars().count() <= TOOL_DESC_BUDGET + 3);
        assert!(compressed.json_schema["properties"]["path"].get("examples").is_none());
        assert!(compressed.json_schema["properties"]["path"]["description"].is_string());
    }

    #[test]
    fn aggressive_strips_descriptions_and_defaults() {
        let tool = sample_tool();
        let compressed = compress_tool(&tool, CompressionLevel::Aggressive);
        assert!(compressed.description.is_none());
        assert!(compressed.json_schema.get("description").is_none());
        assert!(compressed.json_schema["properties"]["content"].get("default").is_none());
        assert_eq!(compressed.json_schema["type"], "object");
        assert_eq!(compressed.json_schema["required"], json!(["path", "content"]));
    }

    #[test]
    fn aggressive_preserves_identity() {
        let tool = sample_tool();
        let compressed = compress_tool(&tool, CompressionLevel::Aggressive);
        assert_eq!(compressed.name, "write_file");
        assert!(compressed.is_function);
    }

    #[test]
    fn truncate_prefers_sentence_boundary() {
        let s = "First sentence here. Second sentence that runs past the budget and keeps going on and on.";
        let truncated = truncate(s, 30);
        assert!(truncated.starts_with("First sentence here."));
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_short_string_untouched() {
        assert_eq!(truncate("short", 100), "short");
    }
}
