//! Logging setup
//!
//! Builds a `tracing` subscriber for applications embedding Tenement. The
//! filter comes from `RUST_LOG` when set, else from `TENEMENT_LOG_LEVEL`.
//!
//! ```rust,ignore
//! tenement::logging::init()?;
//! ```

use std::collections::HashMap;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Level used when no variable selects one
pub const DEFAULT_LEVEL: &str = "info";

/// Environment variable holding the level (or a full filter directive)
pub const LEVEL_VAR: &str = "TENEMENT_LOG_LEVEL";

/// Environment variable holding the output format
pub const FORMAT_VAR: &str = "TENEMENT_LOG_FORMAT";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: Format,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            format: Format::default(),
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Settings from the given variables; unknown formats fall back to pretty.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        if let Some(level) = vars.get(LEVEL_VAR).filter(|v| !v.trim().is_empty()) {
            config.level = level.trim().to_string();
        }
        if let Some(format) = vars.get(FORMAT_VAR).and_then(|v| Format::parse(v)) {
            config.format = format;
        }
        if vars.contains_key("NO_COLOR") {
            config.ansi = false;
        }
        config
    }
}

/// Subscriber configured from the process environment.
pub fn subscriber() -> impl tracing::Subscriber + Send + Sync {
    subscriber_with(&LogConfig::from_env())
}

/// Subscriber for explicit settings. `RUST_LOG` still wins when set.
pub fn subscriber_with(config: &LogConfig) -> impl tracing::Subscriber + Send + Sync + use<> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let layer = match config.format {
        Format::Pretty => fmt::layer().pretty().with_ansi(config.ansi).boxed(),
        Format::Compact => fmt::layer().compact().with_ansi(config.ansi).boxed(),
        Format::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer)
}

/// Install [`subscriber`] as the global default.
pub fn init() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(subscriber())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse(" compact "), Some(Format::Compact));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_config_from_vars() {
        let config = LogConfig::from_vars(&vars(&[
            (LEVEL_VAR, "tenement_core=debug"),
            (FORMAT_VAR, "json"),
            ("NO_COLOR", "1"),
        ]));

        assert_eq!(config.level, "tenement_core=debug");
        assert_eq!(config.format, Format::Json);
        assert!(!config.ansi);
    }

    #[test]
    fn test_config_defaults() {
        let config = LogConfig::from_vars(&vars(&[(LEVEL_VAR, "  "), (FORMAT_VAR, "xml")]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_subscriber_builds() {
        let subscriber = subscriber_with(&LogConfig::default());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(tenant = "test_acme", "Switched tenant");
        });
    }
}
