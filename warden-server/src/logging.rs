//! Log subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use crate::error::{ServerError, ServerResult};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines with full timestamps.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Builds the filter for a level or directive string such as `info` or
/// `warden_consumer=debug,info`.
///
/// # Errors
/// Returns `Logging` if the directive cannot be parsed.
pub fn filter(level: &str) -> ServerResult<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| ServerError::Logging {
        message: format!("invalid log level '{level}': {e}"),
    })
}

/// Installs the global subscriber, writing to stderr.
///
/// # Errors
/// Returns `Logging` if the level is invalid or a subscriber is already set.
pub fn init(level: &str, format: LogFormat) -> ServerResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_target(true)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| ServerError::Logging {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_levels_and_directives() {
        assert!(filter("info").is_ok());
        assert!(filter("warden_consumer=debug,warn").is_ok());
    }

    #[test]
    fn test_filter_rejects_garbage() {
        assert!(matches!(
            filter("warden=notalevel"),
            Err(ServerError::Logging { .. })
        ));
    }
}
