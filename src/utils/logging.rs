use super::config::LogFormat;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Output goes to stderr so the prompt on
/// stdout is not interleaved with log lines.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false);

    // try_init: tests and embedders may have installed a subscriber already
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
