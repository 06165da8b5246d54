use concierge_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Logs go to stderr so command payloads on
/// stdout stay machine-readable. A second call is a no-op.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(logging.level.trim()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(
            event_name = "cli.logging.initialized",
            level = %logging.level,
            format = ?logging.format,
            "logging initialized"
        );
    }
}
