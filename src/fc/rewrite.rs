use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::Value;

use crate::markers::MarkerSet;
use crate::protocol::{ChatMessage, ChatRequest};

use super::prompt::compose_tool_prompt;

/// Build an index mapping `tool_call_id` -> tool name from assistant messages
/// in the conversation history, so tool-result messages can be labelled even
/// when they omit their `name` field.
fn tool_call_name_index(messages: &[ChatMessage]) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for msg in messages {
        if msg.role != "assistant" {
            continue;
        }
        for call in msg.tool_calls.as_deref().unwrap_or_default() {
            if !call.id.is_empty() {
                index.insert(call.id.clone(), call.function.name.clone());
            }
        }
    }
    index
}

fn encode_tool_calls(content: &mut String, msg: &ChatMessage, markers: &MarkerSet) {
    for call in msg.tool_calls.as_deref().unwrap_or_default() {
        let _ = write!(
            content,
            "\n{tc_start}\n{name_start}{name}{name_end}\n{args_start}{args}{args_end}\n{tc_end}",
            tc_start = markers.tc_start,
            tc_end = markers.tc_end,
            name_start = markers.name_start,
            name_end = markers.name_end,
            args_start = markers.args_start,
            args_end = markers.args_end,
            name = call.function.name,
            args = call.function.arguments,
        );
    }
}

fn summarize_tool_calls(content: &mut String, msg: &ChatMessage) {
    let names: Vec<&str> = msg
        .tool_calls
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|call| call.function.name.as_str())
        .collect();
    let _ = write!(content, "\n\n[Called tools: {}]", names.join(", "));
}

/// Rewrite a chat-completions request so its history is consistent with the
/// delimited-text tool protocol.
///
/// When the request declares tools, the protocol contract is appended to the
/// system message (or prepended as a new one), prior assistant tool calls are
/// re-encoded as delimited text, and tool results become user messages
/// wrapped in the result markers. When it declares none, tool-role turns are
/// cleansed into plain text so no marker ever reaches an upstream that was
/// given no tool schema. `tools` and `tool_choice` are removed either way,
/// and adjacent same-role messages are merged because some upstreams reject
/// non-alternating conversations.
pub fn rewrite_chat_request(request: &mut ChatRequest, markers: &MarkerSet) {
    let tools = request.tools.take().unwrap_or_default();
    request.tool_choice = None;

    let has_tools = !tools.is_empty();
    let tool_prompt = has_tools.then(|| compose_tool_prompt(&tools, markers));
    let call_names = tool_call_name_index(&request.messages);

    let mut rewritten: Vec<ChatMessage> = Vec::with_capacity(request.messages.len() + 1);
    let mut prompt_injected = false;

    for mut msg in request.messages.drain(..) {
        match msg.role.as_str() {
            "system" => {
                if let Some(prompt) = tool_prompt.as_deref() {
                    if !prompt_injected {
                        let mut content = msg.content_text();
                        let _ = write!(content, "\n\n{prompt}");
                        msg.content = Some(Value::String(content));
                        prompt_injected = true;
                    }
                }
                rewritten.push(msg);
            }
            "assistant" if msg.tool_calls.as_deref().is_some_and(|c| !c.is_empty()) => {
                let mut content = msg.content_text();
                if has_tools {
                    encode_tool_calls(&mut content, &msg, markers);
                } else {
                    summarize_tool_calls(&mut content, &msg);
                }
                msg.content = Some(Value::String(content));
                msg.tool_calls = None;
                rewritten.push(msg);
            }
            "tool" => {
                let result = msg.content_text();
                let name = msg
                    .name
                    .take()
                    .or_else(|| {
                        msg.tool_call_id
                            .as_deref()
                            .and_then(|id| call_names.get(id).cloned())
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                let content = if has_tools {
                    format!(
                        "{}[{}]\n{}{}",
                        markers.result_start, name, result, markers.result_end
                    )
                } else {
                    format!("[Result from {name}]:\n{result}")
                };
                msg.role = "user".to_string();
                msg.content = Some(Value::String(content));
                msg.tool_call_id = None;
                rewritten.push(msg);
            }
            _ => rewritten.push(msg),
        }
    }

    if !prompt_injected {
        if let Some(prompt) = tool_prompt {
            rewritten.insert(0, ChatMessage::text("system", prompt));
        }
    }

    merge_adjacent_roles(&mut rewritten);
    request.messages = rewritten;
}

/// Collapse consecutive same-role messages, joining their contents with a
/// blank line. Some upstreams (notably Gemini-compatible endpoints) reject
/// non-alternating user/assistant sequences.
fn merge_adjacent_roles(messages: &mut Vec<ChatMessage>) {
    let mut merged: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    for msg in messages.drain(..) {
        match merged.last_mut() {
            Some(prev) if prev.role == msg.role => {
                let combined = format!("{}\n\n{}", prev.content_text(), msg.content_text());
                prev.content = Some(Value::String(combined));
            }
            _ => merged.push(msg),
        }
    }
    *messages = merged;
}
