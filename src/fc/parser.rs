use memchr::memmem;

use crate::markers::MarkerSet;
use crate::protocol::{ToolCall, ToolCallFunction};
use crate::util::unix_now_millis;

// Delimiter-aware tool-call extraction.
//
// A hand-written scanner equivalent to the global non-greedy pattern
//
//   TC_START \s* NAME_START <name> NAME_END \s* ARGS_START <args> ARGS_END \s* TC_END
//
// Names and argument blobs may span multiple lines and are matched up to the
// nearest closing marker. Matched envelopes are removed from the residual
// text whether or not their arguments parse; envelopes whose arguments are
// not valid JSON yield no tool call.

/// One well-formed envelope located in the text.
struct Envelope<'a> {
    name: &'a str,
    args: &'a str,
    /// Byte offset one past the closing marker.
    end: usize,
}

#[inline]
fn skip_whitespace(text: &str, mut pos: usize) -> usize {
    while let Some(ch) = text[pos..].chars().next() {
        if !ch.is_whitespace() {
            break;
        }
        pos += ch.len_utf8();
    }
    pos
}

#[inline]
fn expect_marker(text: &str, pos: usize, marker: &str) -> Option<usize> {
    text[pos..].starts_with(marker).then(|| pos + marker.len())
}

#[inline]
fn find_marker(text: &str, from: usize, marker: &str) -> Option<usize> {
    memmem::find(&text.as_bytes()[from..], marker.as_bytes()).map(|rel| from + rel)
}

/// Try to match a complete envelope whose opening marker sits at `start`.
fn match_envelope<'a>(text: &'a str, start: usize, markers: &MarkerSet) -> Option<Envelope<'a>> {
    let pos = start + markers.tc_start.len();
    let pos = skip_whitespace(text, pos);
    let pos = expect_marker(text, pos, &markers.name_start)?;

    let name_end = find_marker(text, pos, &markers.name_end)?;
    let name = &text[pos..name_end];

    let pos = skip_whitespace(text, name_end + markers.name_end.len());
    let pos = expect_marker(text, pos, &markers.args_start)?;

    let args_end = find_marker(text, pos, &markers.args_end)?;
    let args = &text[pos..args_end];

    let pos = skip_whitespace(text, args_end + markers.args_end.len());
    let end = expect_marker(text, pos, &markers.tc_end)?;

    Some(Envelope { name, args, end })
}

/// Extract all well-formed tool-call envelopes from a complete text blob.
///
/// Returns the structured calls in document order and the residual text with
/// every matched envelope (delimiters included) removed, trimmed. Envelopes
/// with invalid JSON arguments are dropped silently but still stripped from
/// the residual.
#[must_use]
pub fn extract_tool_calls(text: &str, markers: &MarkerSet) -> (Vec<ToolCall>, String) {
    let mut calls = Vec::new();
    let mut clean = String::new();
    let mut copied_to = 0usize;
    let mut scan_from = 0usize;
    let mut match_index = 0usize;
    let stamp = unix_now_millis();

    while let Some(start) = find_marker(text, scan_from, &markers.tc_start) {
        let Some(envelope) = match_envelope(text, start, markers) else {
            // Not a complete envelope at this opening marker; it stays in the
            // residual and scanning resumes after it.
            scan_from = start + markers.tc_start.len();
            continue;
        };

        let name = envelope.name.trim();
        let args = envelope.args.trim();
        if serde_json::from_str::<serde_json::Value>(args).is_ok() {
            calls.push(ToolCall {
                id: format!("call_{stamp}_{match_index}"),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: name.to_string(),
                    arguments: args.to_string(),
                },
            });
        }
        match_index += 1;

        clean.push_str(&text[copied_to..start]);
        copied_to = envelope.end;
        scan_from = envelope.end;
    }

    clean.push_str(&text[copied_to..]);
    (calls, clean.trim().to_string())
}
