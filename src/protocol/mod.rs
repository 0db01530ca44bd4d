//! OpenAI chat-completions wire types.
//!
//! Only the fields the transcoders act on are modeled; everything else a
//! client or upstream sends rides along untouched in `#[serde(flatten)]`
//! maps so a rewritten request (or response) keeps unrelated fields
//! byte-equivalent after re-serialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::{unix_now_millis, unix_now_secs};

/// A chat-completions request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// Whether the request declares a non-empty tool list.
    #[must_use]
    pub fn has_tools(&self) -> bool {
        self.tools.as_deref().is_some_and(|tools| !tools.is_empty())
    }

    #[must_use]
    pub fn wants_stream(&self) -> bool {
        self.stream == Some(true)
    }
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    #[must_use]
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(Value::String(content.into())),
            tool_calls: None,
            name: None,
            tool_call_id: None,
            extra: Map::new(),
        }
    }

    /// Message content as plain text: strings pass through, null/absent is
    /// empty, anything else is JSON-encoded.
    #[must_use]
    pub fn content_text(&self) -> String {
        match &self.content {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

/// A structured tool call carried on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    pub arguments: String,
}

fn function_call_type() -> String {
    "function".to_string()
}

/// A declared tool in the request's `tools` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type", default = "function_call_type")]
    pub spec_type: String,
    pub function: ToolFunction,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

// ---------------------------------------------------------------------------
// Stream chunk construction
// ---------------------------------------------------------------------------

fn chunk_envelope(delta: Value, finish_reason: Option<&str>) -> Value {
    serde_json::json!({
        "id": format!("chatcmpl-{}", unix_now_millis()),
        "object": "chat.completion.chunk",
        "created": unix_now_secs(),
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

/// A chunk carrying a text delta.
#[must_use]
pub fn content_chunk(text: &str) -> Value {
    chunk_envelope(serde_json::json!({ "content": text }), None)
}

/// A chunk carrying one structured tool-call delta at the given index.
#[must_use]
pub fn tool_call_chunk(index: usize, call: &ToolCall) -> Value {
    chunk_envelope(
        serde_json::json!({
            "tool_calls": [{
                "index": index,
                "id": call.id,
                "type": call.call_type,
                "function": {
                    "name": call.function.name,
                    "arguments": call.function.arguments,
                },
            }],
        }),
        None,
    )
}

/// The terminal chunk closing a choice with the given finish reason.
#[must_use]
pub fn finish_chunk(finish_reason: &str) -> Value {
    chunk_envelope(serde_json::json!({}), Some(finish_reason))
}
