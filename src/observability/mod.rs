pub mod request_log;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber from the `LOG_LEVEL` setting.
///
/// `DISABLED` installs nothing. `WARNING` and `CRITICAL` are accepted as
/// aliases for WARN and ERROR; anything else is handed to `EnvFilter` as-is,
/// so directive syntax like `toolbridge=debug` works too. Unparseable values
/// fall back to INFO.
pub fn init_tracing(log_level: &str) {
    let level = log_level.trim().to_uppercase();
    let directive = match level.as_str() {
        "DISABLED" => return,
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        _ => log_level.trim(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO")),
        )
        .with_target(true)
        .init();
}
