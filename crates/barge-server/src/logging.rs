//! Structured logging initialization.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line human-readable output (development).
    Pretty,
    /// JSON output (log aggregation).
    Json,
}

impl LogFormat {
    /// Parses a format name; anything that is not `json` falls back to
    /// the human-readable format.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Default filter: the given level for every barge crate, quieter HTTP
/// plumbing. `RUST_LOG` overrides the whole directive set when present.
fn default_filter(level: &str) -> EnvFilter {
    let directives = ["barge_server", "barge_protocol", "barge_git", "barge_store"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .chain(["tower_http=info".to_string()])
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

/// Initialize the logging system.
pub fn init_logging(level: &str, format: LogFormat) {
    let base = tracing_subscriber::registry().with(default_filter(level));
    match format {
        LogFormat::Json => base
            .with(fmt::layer().json().flatten_event(true))
            .init(),
        LogFormat::Pretty => base
            .with(fmt::layer().compact().with_target(false))
            .init(),
    }
    tracing::info!(%level, ?format, "logging ready");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_parse_case_insensitively() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything-else"), LogFormat::Pretty);
    }
}
