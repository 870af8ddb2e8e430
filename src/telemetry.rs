//! Tracing subscriber setup shared by the binaries.

use crate::config::LogSettings;
use thiserror::Error;
use tracing_subscriber::{
    EnvFilter,
    filter::ParseError,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "SMCP_LOG";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives are malformed.
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        /// Directives that failed to parse.
        filter: String,
        /// Parser failure.
        source: ParseError,
    },

    /// A global subscriber is already installed.
    #[error("cannot install log subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Installs a formatted stderr subscriber for `settings`.
///
/// [`LOG_ENV`] takes precedence over [`LogSettings::filter`].
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for malformed directives and
/// [`TelemetryError::Install`] when called twice.
pub fn init_tracing(settings: &LogSettings) -> Result<(), TelemetryError> {
    let directives = std::env::var(LOG_ENV).unwrap_or_else(|_| settings.filter.clone());
    let filter = EnvFilter::try_new(&directives).map_err(|source| TelemetryError::Filter {
        filter: directives.clone(),
        source,
    })?;

    let span_events = if settings.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = fmt::layer()
        .with_target(true)
        .with_span_events(span_events)
        .with_file(settings.file_line)
        .with_line_number(settings.file_line)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filter() {
        let settings = LogSettings {
            filter: "smcp=loud".to_owned(),
            ..LogSettings::default()
        };

        if std::env::var(LOG_ENV).is_ok() {
            return;
        }
        let err = init_tracing(&settings).expect_err("malformed filter");

        assert!(matches!(err, TelemetryError::Filter { .. }));
    }
}
