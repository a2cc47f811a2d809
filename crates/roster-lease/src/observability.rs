//! Logging initialisation and span helpers.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset: lease decisions at `info`, the
/// host application at `warn`.
pub const DEFAULT_DIRECTIVE: &str = "warn,roster_lease=info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable output.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses `json` or `pretty`, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// Reads `ROSTER_LEASE_LOG_FORMAT`, falling back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("ROSTER_LEASE_LOG_FORMAT")
            .ok()
            .and_then(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}

/// Installs the global subscriber for lease coordinator logs.
///
/// Only the first call has an effect. `RUST_LOG` overrides
/// [`DEFAULT_DIRECTIVE`]; acquire denials and retries log at `debug` under
/// the `roster_lease` target.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
        let registry = tracing_subscriber::registry().with(env_filter);

        match format {
            LogFormat::Json => registry.with(fmt::layer().json()).init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
        }
    });
}

/// Creates a span for a lease operation on one entry.
#[must_use]
pub fn lease_span(operation: &str, collection_id: &str, entry_id: &str) -> Span {
    tracing::info_span!(
        "lease",
        op = operation,
        collection = collection_id,
        entry = entry_id,
    )
}

/// Creates a span for collection-wide work (watch fan-out, sweeps).
#[must_use]
pub fn collection_span(operation: &str, collection_id: &str) -> Span {
    tracing::info_span!("lease_collection", op = operation, collection = collection_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!(LogFormat::parse(" JSON "), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn default_directive_is_a_valid_filter() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVE).is_ok());
    }

    #[test]
    fn test_span_helpers_create_spans() {
        let span = lease_span("acquire", "roster-1", "7");
        let _guard = span.enter();
        tracing::info!("inside lease span");

        let span = collection_span("sweep", "roster-1");
        let _guard = span.enter();
        tracing::info!("inside collection span");
    }
}
