//! Shared configuration helpers: the error type, duration parsing and
//! `${VAR}` expansion.

use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Errors raised while loading server or agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is not valid YAML for the expected shape.
    #[error("cannot parse configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Parse a duration string.
///
/// Accepts humantime forms (`30s`, `5m`, `1h30m`, `100ms`) and a bare number
/// of seconds (`300`), as `STORE_INTERVAL` and `POLL_INTERVAL` are usually set.
///
/// # Examples
///
/// ```
/// use runmetrics::config::parse_duration;
///
/// assert_eq!(parse_duration("10").unwrap().as_secs(), 10);
/// assert_eq!(parse_duration("2m").unwrap().as_secs(), 120);
/// ```
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    match raw.parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => humantime::parse_duration(raw).map_err(|e| format!("{raw}: {e}")),
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("placeholder pattern is valid")
    })
}

/// Replace `${NAME}` and `${NAME:-fallback}` with environment values.
///
/// Unset variables without a fallback expand to an empty string.
pub fn expand_env_vars(input: &str) -> String {
    placeholder()
        .replace_all(input, |caps: &Captures| {
            std::env::var(&caps[1])
                .unwrap_or_else(|_| caps.get(2).map_or_else(String::new, |m| m.as_str().to_owned()))
        })
        .into_owned()
}

pub(crate) fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_accepts_seconds_and_humantime() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration(" 10 ").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for raw in ["", "  ", "fast", "12 parsecs", "-5"] {
            assert!(parse_duration(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_expand_uses_fallback_for_unset_var() {
        let result = expand_env_vars("sqlite:${NONEXISTENT_METRICS_DIR_12345:-data}/metrics.db");
        assert_eq!(result, "sqlite:data/metrics.db");
    }

    #[test]
    fn test_expand_reads_process_env() {
        // SAFETY: only this test touches this variable.
        unsafe {
            std::env::set_var("RUNMETRICS_TEST_DSN", "sqlite:/tmp/m.db");
        }
        assert_eq!(expand_env_vars("${RUNMETRICS_TEST_DSN}"), "sqlite:/tmp/m.db");
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("RUNMETRICS_TEST_DSN");
        }
    }

    #[test]
    fn test_expand_leaves_plain_text_alone() {
        assert_eq!(expand_env_vars("metrics.json"), "metrics.json");
    }
}
