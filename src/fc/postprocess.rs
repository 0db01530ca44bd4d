use serde_json::Value;

use crate::markers::MarkerSet;

use super::parser::extract_tool_calls;

/// Extract delimited tool calls from a buffered upstream response.
///
/// Runs the envelope parser over `choices[0].message.content`. When at least
/// one call is found, the message gains structured `tool_calls`, its content
/// shrinks to the residual text (or `null` when empty), and the choice's
/// `finish_reason` becomes `"tool_calls"`. Responses without envelopes pass
/// through untouched, as do all unrelated fields and choices.
pub fn transcode_response(response: &mut Value, markers: &MarkerSet) {
    let Some(content) = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    else {
        return;
    };

    let (calls, clean) = extract_tool_calls(content, markers);
    if calls.is_empty() {
        return;
    }

    let Some(message) = response.pointer_mut("/choices/0/message") else {
        return;
    };
    let Some(message) = message.as_object_mut() else {
        return;
    };
    message.insert(
        "tool_calls".to_string(),
        serde_json::to_value(&calls).unwrap_or(Value::Null),
    );
    message.insert(
        "content".to_string(),
        if clean.is_empty() {
            Value::Null
        } else {
            Value::String(clean)
        },
    );

    if let Some(choice) = response
        .pointer_mut("/choices/0")
        .and_then(Value::as_object_mut)
    {
        choice.insert(
            "finish_reason".to_string(),
            Value::String("tool_calls".to_string()),
        );
    }
}
