use std::path::PathBuf;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {var} value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen port (`PORT`).
    pub port: u16,
    /// Per-request JSON log files enabled (`LOG_ENABLED=true`).
    pub log_enabled: bool,
    /// Directory receiving per-request log files (`LOG_DIR`).
    pub log_dir: PathBuf,
    /// Disable private-network upstream checks (`ALLOW_LOCAL_NET=true`).
    pub allow_local_net: bool,
    /// Tracing filter level (`LOG_LEVEL`).
    pub log_level: String,
}

fn default_port() -> u16 {
    3000
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_enabled: false,
            log_dir: default_log_dir(),
            allow_local_net: false,
            log_level: default_log_level(),
        }
    }
}

/// Load configuration from process environment variables.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when `PORT` is present but not a valid
/// TCP port number.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    config_from_lookup(|var| std::env::var(var).ok())
}

/// Boolean environment flags are `true` on the literal string `true` and
/// false on anything else, including absence.
fn env_flag(value: Option<String>) -> bool {
    value.as_deref() == Some("true")
}

fn config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<AppConfig, ConfigError> {
    let port = match lookup("PORT") {
        None => default_port(),
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|e| ConfigError::Invalid {
                var: "PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
    };

    Ok(AppConfig {
        port,
        log_enabled: env_flag(lookup("LOG_ENABLED")),
        log_dir: lookup("LOG_DIR").map_or_else(default_log_dir, PathBuf::from),
        allow_local_net: env_flag(lookup("ALLOW_LOCAL_NET")),
        log_level: lookup("LOG_LEVEL").unwrap_or_else(default_log_level),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |var| {
            pairs
                .iter()
                .find(|(name, _)| *name == var)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = config_from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 3000);
        assert!(!config.log_enabled);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert!(!config.allow_local_net);
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_all_vars_respected() {
        let config = config_from_lookup(lookup_from(&[
            ("PORT", "8080"),
            ("LOG_ENABLED", "true"),
            ("LOG_DIR", "/tmp/tb-logs"),
            ("ALLOW_LOCAL_NET", "true"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.log_enabled);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/tb-logs"));
        assert!(config.allow_local_net);
        assert_eq!(config.log_level, "DEBUG");
    }

    #[test]
    fn test_flag_is_literal_true_only() {
        let config = config_from_lookup(lookup_from(&[
            ("LOG_ENABLED", "1"),
            ("ALLOW_LOCAL_NET", "TRUE"),
        ]))
        .unwrap();
        assert!(!config.log_enabled);
        assert!(!config.allow_local_net);
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let result = config_from_lookup(lookup_from(&[("PORT", "not-a-port")]));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert!(err.to_string().contains("not-a-port"));
    }
}
