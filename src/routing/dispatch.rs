use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::error::ProxyError;
use crate::fc::{rewrite_chat_request, transcode_response};
use crate::markers::MarkerSet;
use crate::observability::request_log::RequestLog;
use crate::protocol::ChatRequest;
use crate::security::{extract_upstream_url, validate_upstream};
use crate::state::AppState;
use crate::stream::StreamTranscoder;

const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;
const LOG_BODY_PREVIEW_BYTES: usize = 64 * 1024;

/// Entry point for every inbound request.
///
/// Wraps the proxy pipeline so failures render as the JSON error surface and
/// the per-request log (when enabled) is flushed exactly once.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let mut log = RequestLog::begin(&state.config);

    let response = match proxy_request(&state, request, log.as_mut()).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(kind = err.kind(), error = %err, "request failed");
            if let Some(log) = log.as_mut() {
                log.record("error", json!({"kind": err.kind(), "message": err.to_string()}));
            }
            err.into_response()
        }
    };

    if let Some(mut log) = log {
        log.record(
            "client_response",
            json!({"status": response.status().as_u16()}),
        );
        tokio::spawn(log.flush());
    }

    Ok(response)
}

async fn proxy_request(
    state: &AppState,
    request: Request<Body>,
    mut log: Option<&mut RequestLog>,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let raw_target = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path(), |pq| pq.as_str());

    let upstream_raw = extract_upstream_url(raw_target)
        .ok_or_else(|| ProxyError::Security("Invalid upstream URL".to_string()))?;
    let upstream = validate_upstream(upstream_raw, state.config.allow_local_net).await?;

    let body_bytes = body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ProxyError::Internal("Request body exceeds the 50 MiB limit".to_string()))?;

    let is_chat = upstream_raw.contains("/chat/completions");
    if let Some(log) = log.as_deref_mut() {
        log.record(
            "incoming_request",
            json!({
                "method": parts.method.as_str(),
                "upstream": upstream_raw,
                "chat_completions": is_chat,
                "body": body_log_value(&body_bytes),
            }),
        );
    }

    let mut has_tools = false;
    let mut stream_requested = false;
    let out_body = if is_chat && parts.method == Method::POST {
        match serde_json::from_slice::<ChatRequest>(&body_bytes) {
            Ok(mut chat) => {
                has_tools = chat.has_tools();
                stream_requested = chat.wants_stream();
                rewrite_chat_request(&mut chat, &state.markers);
                if let Some(log) = log.as_deref_mut() {
                    log.record(
                        "rewritten_request",
                        serde_json::to_value(&chat).unwrap_or(Value::Null),
                    );
                }
                let rewritten = serde_json::to_vec(&chat).map_err(|err| {
                    ProxyError::Internal(format!("Failed to serialize rewritten request: {err}"))
                })?;
                Bytes::from(rewritten)
            }
            Err(err) => {
                // Transcoders never reject a payload; an unparseable chat
                // body is forwarded untouched.
                tracing::debug!(error = %err, "chat-completions body did not parse, forwarding verbatim");
                body_bytes
            }
        }
    } else {
        body_bytes
    };

    tracing::info!(
        method = %parts.method,
        upstream = %upstream,
        chat = is_chat,
        tools = has_tools,
        stream = stream_requested,
        "proxying request"
    );

    let request_body =
        (parts.method != Method::GET && parts.method != Method::HEAD).then_some(out_body);
    let upstream_response = state
        .transport
        .forward(parts.method.clone(), &upstream, &parts.headers, request_body)
        .await?;

    let status = upstream_response.status();
    if let Some(log) = log.as_deref_mut() {
        log.record("upstream_response", json!({"status": status.as_u16()}));
    }

    if !status.is_success() {
        // Mirror the upstream status and body verbatim.
        return Ok(buffered_upstream_response(upstream_response).await);
    }

    if is_chat && has_tools && stream_requested {
        if let Some(log) = log.as_deref_mut() {
            log.record("response_disposition", json!("stream_transcode"));
        }
        return Ok(transcoded_stream_response(
            upstream_response,
            state.markers.clone(),
        ));
    }

    if is_chat && has_tools {
        let content_type = upstream_response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .cloned();
        let response_bytes = upstream_response
            .bytes()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        if let Ok(mut value) = serde_json::from_slice::<Value>(&response_bytes) {
            transcode_response(&mut value, &state.markers);
            if let Some(log) = log.as_deref_mut() {
                log.record("transcoded_response", value.clone());
            }
            return Ok((status, axum::Json(value)).into_response());
        }
        return Ok(bytes_response(status, content_type, response_bytes));
    }

    // Everything else (no tools declared, or a non-chat endpoint) flows
    // through byte-for-byte, streamed or not.
    Ok(passthrough_response(upstream_response))
}

fn body_log_value(bytes: &Bytes) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return value;
    }
    let preview = &bytes[..bytes.len().min(LOG_BODY_PREVIEW_BYTES)];
    Value::String(String::from_utf8_lossy(preview).into_owned())
}

async fn buffered_upstream_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(http::header::CONTENT_TYPE)
        .cloned();
    let body = upstream.bytes().await.unwrap_or_default();
    bytes_response(status, content_type, body)
}

fn bytes_response(status: StatusCode, content_type: Option<HeaderValue>, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(http::header::CONTENT_TYPE, content_type);
    }
    response
}

fn passthrough_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(http::header::CONTENT_TYPE)
        .cloned();
    let stream = upstream
        .bytes_stream()
        .map(|result| result.map_err(|err| std::io::Error::other(err.to_string())));
    bytes_stream_response(status, content_type, Body::from_stream(stream))
}

fn bytes_stream_response(
    status: StatusCode,
    content_type: Option<HeaderValue>,
    body: Body,
) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response
            .headers_mut()
            .insert(http::header::CONTENT_TYPE, content_type);
    }
    response
}

/// Bridge the upstream SSE byte stream through the tool-call transcoder.
///
/// Two cooperating halves per request: the unfold body pulls upstream bytes
/// and feeds the transcoder; hyper drains the emitted frames to the client
/// socket. Ordering is upstream arrival order. A mid-stream upstream failure
/// surfaces as a body error so the client connection closes without a
/// fabricated completion; a client disconnect drops the whole stream, state
/// included.
fn transcoded_stream_response(upstream: reqwest::Response, markers: MarkerSet) -> Response {
    let source = upstream.bytes_stream();
    let frames = futures_util::stream::unfold(
        (
            Box::pin(source),
            StreamTranscoder::new(markers),
            VecDeque::<Bytes>::new(),
            false,
        ),
        |(mut source, mut transcoder, mut pending, mut done)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((
                        Ok::<Bytes, std::io::Error>(frame),
                        (source, transcoder, pending, done),
                    ));
                }
                if done {
                    return None;
                }

                let mut out = Vec::new();
                match source.as_mut().next().await {
                    Some(Ok(bytes)) => transcoder.feed(&bytes, &mut out),
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "upstream stream failed mid-response");
                        return Some((
                            Err(std::io::Error::other(err.to_string())),
                            (source, transcoder, pending, true),
                        ));
                    }
                    None => {
                        transcoder.finish(&mut out);
                        done = true;
                    }
                }
                pending.extend(out);
            }
        },
    );

    let mut response = Response::new(Body::from_stream(frames));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
    response
}
