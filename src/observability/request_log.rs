use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::util::unix_now_millis;

/// One timed phase inside a request's lifecycle.
#[derive(Debug, Serialize)]
pub struct PhaseRecord {
    pub phase: String,
    pub time_ms: u64,
    pub content: Value,
}

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    #[serde(rename = "requestId")]
    request_id: &'a str,
    timestamp: u64,
    phases: &'a [PhaseRecord],
}

/// Per-request phase log, flushed to one JSON file under the configured log
/// directory at request end. Writes are best-effort; a failing log directory
/// never affects the client.
pub struct RequestLog {
    request_id: String,
    timestamp_ms: u64,
    started: Instant,
    dir: PathBuf,
    phases: Vec<PhaseRecord>,
}

impl RequestLog {
    /// Start a log for one request, or `None` when logging is disabled.
    #[must_use]
    pub fn begin(config: &AppConfig) -> Option<Self> {
        if !config.log_enabled {
            return None;
        }
        let timestamp_ms = unix_now_millis();
        Some(Self {
            request_id: format!("req_{timestamp_ms}_{:08x}", fastrand::u32(..)),
            timestamp_ms,
            started: Instant::now(),
            dir: config.log_dir.clone(),
            phases: Vec::new(),
        })
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Record a phase with the elapsed time since the request began.
    pub fn record(&mut self, phase: &str, content: Value) {
        self.phases.push(PhaseRecord {
            phase: phase.to_string(),
            time_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            content,
        });
    }

    /// Write the accumulated record to `<LOG_DIR>/<request_id>.json`.
    pub async fn flush(self) {
        let record = LogRecord {
            request_id: &self.request_id,
            timestamp: self.timestamp_ms,
            phases: &self.phases,
        };
        let json = match serde_json::to_vec_pretty(&record) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize request log");
                return;
            }
        };

        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(error = %err, dir = %self.dir.display(), "failed to create log directory");
            return;
        }
        let path = self.dir.join(format!("{}.json", self.request_id));
        if let Err(err) = tokio::fs::write(&path, json).await {
            tracing::warn!(error = %err, path = %path.display(), "failed to write request log");
        }
    }
}
