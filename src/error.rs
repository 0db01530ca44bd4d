use axum::response::IntoResponse;

/// Error type for the proxy's own failures.
///
/// Only infrastructure failures surface here. Malformed model output is never
/// an error: the transcoders degrade to textual passthrough instead. Upstream
/// non-2xx responses are mirrored verbatim and never pass through this type.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Access denied: {0}")]
    Security(String),
    #[error("Upstream request failed: {0}")]
    Transport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Wire-visible error type tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Security(_) => "security_error",
            ProxyError::Transport(_) => "proxy_error",
            ProxyError::Internal(_) => "server_error",
        }
    }

    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        match self {
            ProxyError::Security(_) => http::StatusCode::FORBIDDEN,
            ProxyError::Transport(_) => http::StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Format an error as the OpenAI-style JSON body `{"error":{message,type}}`.
#[must_use]
pub fn error_payload(kind: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": kind,
        }
    })
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let body = error_payload(self.kind(), &self.to_string());
        (self.status(), axum::Json(body)).into_response()
    }
}
