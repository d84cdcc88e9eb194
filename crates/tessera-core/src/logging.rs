//! Logging integration.
//!
//! Installs a [`tracing`] subscriber configured from [`Settings`] and
//! provides spans that tag work done on one connection.

use crate::settings::{LogFormat, Settings};

/// Installs the global tracing subscriber.
///
/// The filter comes from `settings.log_level` (an `EnvFilter` directive);
/// invalid directives fall back to `info`. Debug mode always uses the
/// pretty format. Calling this twice is harmless: the second install is
/// ignored.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let format = if settings.debug {
        LogFormat::Pretty
    } else {
        settings.log_format
    };

    match format {
        LogFormat::Pretty => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok(),
        LogFormat::Compact => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init()
            .ok(),
        LogFormat::Json => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok(),
    };
}

/// Creates a span for work done on one database connection.
///
/// # Examples
///
/// ```
/// use tessera_core::logging::connection_span;
///
/// let span = connection_span(7);
/// let _guard = span.enter();
/// tracing::debug!("running on connection 7");
/// ```
pub fn connection_span(connection_id: u64) -> tracing::Span {
    tracing::info_span!("connection", id = connection_id)
}
