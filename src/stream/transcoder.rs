use bytes::Bytes;
use memchr::{memchr, memmem};
use serde_json::Value;

use crate::fc::parser::extract_tool_calls;
use crate::markers::MarkerSet;
use crate::protocol::{content_chunk, finish_chunk, tool_call_chunk};
use crate::stream::{openai_sse_frame, DONE_FRAME};

// Streaming tool-call transcoder.
//
// Consumes the upstream chat-completions SSE byte stream and re-emits it with
// delimited tool-call envelopes converted to structured `tool_calls` deltas.
// A small per-request state machine:
//
// - Clean text flows through as content chunks.
// - A text tail that could be the start of the opening marker is held back
//   until the next delta rules an envelope in or out.
// - Once the opening marker is seen, everything buffers until stream end
//   (the protocol puts tool calls at the end of the response), then the
//   buffered block is parsed and emitted as structured deltas.
//
// Key invariants:
// - While buffering, the buffer always begins with the opening marker.
// - The held-back tail never contains the opening marker in full.
// - Downstream text deltas preserve upstream order and are never reordered.

/// Per-request streaming state. Created on upstream response, dropped on
/// stream close or client disconnect; nothing is shared between requests.
pub struct StreamTranscoder {
    markers: MarkerSet,
    tc_start_first_char: char,
    /// Unterminated tail of the last upstream chunk, byte-accurate so UTF-8
    /// sequences split across network reads survive.
    line_buffer: Vec<u8>,
    /// Accumulates a suspected tool-call block, opening marker included.
    content_buffer: String,
    /// Trailing sliver that might be the beginning of the opening marker.
    pending_text: String,
    is_buffering: bool,
    stream_ended: bool,
}

impl StreamTranscoder {
    #[must_use]
    pub fn new(markers: MarkerSet) -> Self {
        let tc_start_first_char = markers.tc_start_first_char();
        Self {
            markers,
            tc_start_first_char,
            line_buffer: Vec::new(),
            content_buffer: String::new(),
            pending_text: String::new(),
            is_buffering: false,
            stream_ended: false,
        }
    }

    /// Whether terminal handling has run (`[DONE]` seen or EOF flushed).
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.stream_ended
    }

    /// Feed raw upstream bytes; completed SSE frames for the client are
    /// appended to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) {
        if self.stream_ended {
            return;
        }
        self.line_buffer.extend_from_slice(chunk);

        let mut consumed = 0usize;
        while let Some(rel) = memchr(b'\n', &self.line_buffer[consumed..]) {
            let line_end = consumed + rel;
            let mut line_bytes = &self.line_buffer[consumed..line_end];
            if line_bytes.last() == Some(&b'\r') {
                line_bytes = &line_bytes[..line_bytes.len() - 1];
            }
            let line = String::from_utf8_lossy(line_bytes).into_owned();
            consumed = line_end + 1;
            self.process_line(&line, out);
            if self.stream_ended {
                break;
            }
        }
        self.line_buffer.drain(..consumed);
    }

    /// Terminal handling on upstream EOF. A no-op when `[DONE]` already ran.
    pub fn finish(&mut self, out: &mut Vec<Bytes>) {
        if self.stream_ended {
            return;
        }
        self.stream_ended = true;

        if !self.is_buffering && !self.pending_text.is_empty() {
            let pending = std::mem::take(&mut self.pending_text);
            push_chunk(out, content_chunk(&pending));
        }

        if self.content_buffer.is_empty() {
            push_chunk(out, finish_chunk("stop"));
            out.push(Bytes::from_static(DONE_FRAME.as_bytes()));
            return;
        }

        let buffered = std::mem::take(&mut self.content_buffer);
        let (calls, residual) = extract_tool_calls(&buffered, &self.markers);
        if calls.is_empty() {
            // Nothing extracted: the whole buffer is client-visible text,
            // malformed envelopes included.
            push_chunk(out, content_chunk(&buffered));
            push_chunk(out, finish_chunk("stop"));
        } else {
            if !residual.is_empty() {
                push_chunk(out, content_chunk(&residual));
            }
            for (index, call) in calls.iter().enumerate() {
                push_chunk(out, tool_call_chunk(index, call));
            }
            push_chunk(out, finish_chunk("tool_calls"));
        }
        out.push(Bytes::from_static(DONE_FRAME.as_bytes()));
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<Bytes>) {
        if line.is_empty() {
            return;
        }
        // Comments, keepalives, and named events are not ours to interpret.
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        if payload.trim() == "[DONE]" {
            self.finish(out);
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return;
        };
        // Only textual content participates in tool detection; role, refusal,
        // and other delta fields are dropped.
        let Some(content) = value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        else {
            return;
        };
        if content.is_empty() {
            return;
        }
        self.handle_text(content, out);
    }

    fn handle_text(&mut self, text: &str, out: &mut Vec<Bytes>) {
        if self.is_buffering {
            self.content_buffer.push_str(text);
            return;
        }

        let mut combined = std::mem::take(&mut self.pending_text);
        combined.push_str(text);

        if let Some(start) =
            memmem::find(combined.as_bytes(), self.markers.tc_start.as_bytes())
        {
            if start > 0 {
                push_chunk(out, content_chunk(&combined[..start]));
            }
            self.content_buffer.push_str(&combined[start..]);
            self.is_buffering = true;
        } else if combined.contains(self.tc_start_first_char) {
            // The tail could be an envelope opening mid-marker; hold the lot
            // until the next delta settles it.
            self.pending_text = combined;
        } else {
            push_chunk(out, content_chunk(&combined));
        }
    }
}

#[inline]
fn push_chunk(out: &mut Vec<Bytes>, chunk: Value) {
    out.push(Bytes::from(openai_sse_frame(&chunk.to_string())));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> MarkerSet {
        MarkerSet::from_picks(0, 0, 0)
    }

    fn delta_frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({
                "id": "chatcmpl-up",
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}],
            })
        )
    }

    fn feed_all(transcoder: &mut StreamTranscoder, frames: &[String]) -> Vec<Value> {
        let mut out = Vec::new();
        for frame in frames {
            transcoder.feed(frame.as_bytes(), &mut out);
        }
        transcoder.feed(b"data: [DONE]\n\n", &mut out);
        decode(&out)
    }

    fn decode(frames: &[Bytes]) -> Vec<Value> {
        frames
            .iter()
            .filter_map(|frame| {
                let text = std::str::from_utf8(frame).unwrap();
                let payload = text.strip_prefix("data: ").unwrap().trim_end();
                if payload == "[DONE]" {
                    None
                } else {
                    Some(serde_json::from_str(payload).unwrap())
                }
            })
            .collect()
    }

    fn concat_content(chunks: &[Value]) -> String {
        chunks
            .iter()
            .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
            .collect()
    }

    fn finish_reasons(chunks: &[Value]) -> Vec<String> {
        chunks
            .iter()
            .filter_map(|c| c["choices"][0]["finish_reason"].as_str())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn plain_text_stream_passes_through() {
        let mut t = StreamTranscoder::new(markers());
        let chunks = feed_all(
            &mut t,
            &[delta_frame("Hello, "), delta_frame("world!")],
        );
        assert_eq!(concat_content(&chunks), "Hello, world!");
        assert_eq!(finish_reasons(&chunks), vec!["stop"]);
    }

    #[test]
    fn done_frame_is_always_last() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(delta_frame("hi").as_bytes(), &mut out);
        t.feed(b"data: [DONE]\n\n", &mut out);
        let last = std::str::from_utf8(out.last().unwrap()).unwrap();
        assert_eq!(last, "data: [DONE]\n\n");
    }

    #[test]
    fn envelope_spanning_deltas_becomes_tool_call() {
        let m = markers();
        let mut t = StreamTranscoder::new(m.clone());
        let chunks = feed_all(
            &mut t,
            &[
                delta_frame("Going to call "),
                delta_frame("a tool.\n༒龘ᐅ\n࿇▸add◂࿇\n"),
                delta_frame("࿇▹{\"a\":1}◃࿇\nᐊ龘༒"),
            ],
        );

        assert_eq!(concat_content(&chunks), "Going to call a tool.\n");

        let tool_chunk = chunks
            .iter()
            .find(|c| !c["choices"][0]["delta"]["tool_calls"].is_null())
            .expect("tool call delta emitted");
        let call = &tool_chunk["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["function"]["name"], "add");
        assert_eq!(call["function"]["arguments"], "{\"a\":1}");

        assert_eq!(finish_reasons(&chunks), vec!["tool_calls"]);
    }

    #[test]
    fn opening_marker_split_across_deltas() {
        let m = markers();
        let mut t = StreamTranscoder::new(m.clone());
        // "༒龘ᐅ" split mid-marker between two deltas.
        let chunks = feed_all(
            &mut t,
            &[
                delta_frame("text ༒"),
                delta_frame("龘ᐅ\n࿇▸f◂࿇\n࿇▹{}◃࿇\nᐊ龘༒"),
            ],
        );
        assert_eq!(concat_content(&chunks), "text ");
        let names: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c["choices"][0]["delta"]["tool_calls"][0]["function"]["name"].as_str())
            .collect();
        assert_eq!(names, vec!["f"]);
    }

    #[test]
    fn first_char_false_alarm_is_flushed_at_end() {
        let m = markers();
        let mut t = StreamTranscoder::new(m.clone());
        // '༒' appears but no full marker ever forms: held, then flushed.
        let chunks = feed_all(&mut t, &[delta_frame("lone ༒ glyph"), delta_frame(" tail")]);
        assert_eq!(concat_content(&chunks), "lone ༒ glyph tail");
        assert_eq!(finish_reasons(&chunks), vec!["stop"]);
    }

    #[test]
    fn stream_without_marker_concatenates_identically() {
        let mut t = StreamTranscoder::new(markers());
        let parts = ["The ", "quick ", "brown ", "fox. ", "No tools here."];
        let frames: Vec<String> = parts.iter().map(|p| delta_frame(p)).collect();
        let chunks = feed_all(&mut t, &frames);
        assert_eq!(concat_content(&chunks), parts.concat());
    }

    #[test]
    fn two_envelopes_emit_sequential_indices() {
        let m = markers();
        let mut t = StreamTranscoder::new(m.clone());
        let body = "\n༒龘ᐅ\n࿇▸one◂࿇\n࿇▹{}◃࿇\nᐊ龘༒\n༒龘ᐅ\n࿇▸two◂࿇\n࿇▹{}◃࿇\nᐊ龘༒";
        let chunks = feed_all(&mut t, &[delta_frame("go"), delta_frame(body)]);

        let calls: Vec<(u64, String)> = chunks
            .iter()
            .filter_map(|c| {
                let call = &c["choices"][0]["delta"]["tool_calls"][0];
                Some((
                    call["index"].as_u64()?,
                    call["function"]["name"].as_str()?.to_string(),
                ))
            })
            .collect();
        assert_eq!(calls, vec![(0, "one".to_string()), (1, "two".to_string())]);
        assert_eq!(finish_reasons(&chunks), vec!["tool_calls"]);
    }

    #[test]
    fn malformed_envelope_is_emitted_verbatim_as_text() {
        let m = markers();
        let mut t = StreamTranscoder::new(m.clone());
        let body = "\n༒龘ᐅ\n࿇▸f◂࿇\n࿇▹{oops}◃࿇\nᐊ龘༒";
        let chunks = feed_all(&mut t, &[delta_frame("pre"), delta_frame(body)]);
        assert_eq!(concat_content(&chunks), format!("pre{body}"));
        assert_eq!(finish_reasons(&chunks), vec!["stop"]);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(b": keepalive comment\n\n", &mut out);
        t.feed(b"event: ping\n\n", &mut out);
        t.feed(delta_frame("ok").as_bytes(), &mut out);
        t.feed(b"data: [DONE]\n\n", &mut out);
        let chunks = decode(&out);
        assert_eq!(concat_content(&chunks), "ok");
    }

    #[test]
    fn undecodable_payload_lines_are_skipped() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(b"data: {not json\n\n", &mut out);
        t.feed(delta_frame("still fine").as_bytes(), &mut out);
        t.feed(b"data: [DONE]\n\n", &mut out);
        assert_eq!(concat_content(&decode(&out)), "still fine");
    }

    #[test]
    fn sse_line_split_across_network_chunks() {
        let m = markers();
        let mut t = StreamTranscoder::new(m);
        let frame = delta_frame("split across reads");
        let (a, b) = frame.as_bytes().split_at(frame.len() / 2);
        let mut out = Vec::new();
        t.feed(a, &mut out);
        t.feed(b, &mut out);
        t.feed(b"data: [DONE]\n\n", &mut out);
        assert_eq!(concat_content(&decode(&out)), "split across reads");
    }

    #[test]
    fn utf8_sequence_split_across_network_chunks() {
        let mut t = StreamTranscoder::new(markers());
        let frame = delta_frame("héllo ✓");
        // Split inside the multi-byte 'é'.
        let split = frame.find('é').unwrap() + 1;
        let mut out = Vec::new();
        t.feed(&frame.as_bytes()[..split], &mut out);
        t.feed(&frame.as_bytes()[split..], &mut out);
        t.feed(b"data: [DONE]\n\n", &mut out);
        assert_eq!(concat_content(&decode(&out)), "héllo ✓");
    }

    #[test]
    fn eof_without_done_still_terminates() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(delta_frame("partial").as_bytes(), &mut out);
        t.finish(&mut out);
        let chunks = decode(&out);
        assert_eq!(concat_content(&chunks), "partial");
        assert_eq!(finish_reasons(&chunks), vec!["stop"]);
        let last = std::str::from_utf8(out.last().unwrap()).unwrap();
        assert_eq!(last, "data: [DONE]\n\n");
    }

    #[test]
    fn finish_after_done_is_a_no_op() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(delta_frame("x").as_bytes(), &mut out);
        t.feed(b"data: [DONE]\n\n", &mut out);
        let len_after_done = out.len();
        t.finish(&mut out);
        assert_eq!(out.len(), len_after_done);
        assert!(t.is_ended());
    }

    #[test]
    fn frames_after_done_are_dropped() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(b"data: [DONE]\n\n", &mut out);
        let len_after_done = out.len();
        t.feed(delta_frame("late").as_bytes(), &mut out);
        assert_eq!(out.len(), len_after_done);
    }

    #[test]
    fn emitted_chunks_have_openai_shape() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(delta_frame("shape").as_bytes(), &mut out);
        let chunks = decode(&out);
        let chunk = &chunks[0];
        assert!(chunk["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert!(chunk["created"].as_u64().unwrap() > 0);
        assert_eq!(chunk["choices"][0]["index"], 0);
    }

    #[test]
    fn role_only_deltas_emit_nothing() {
        let mut t = StreamTranscoder::new(markers());
        let mut out = Vec::new();
        t.feed(
            b"data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            &mut out,
        );
        assert!(out.is_empty());
    }
}
