//! Tracing setup.

use crate::cli::IndexerConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter directives for a `-v` count when `RUST_LOG` is unset.
pub fn default_filter(verbosity: u8) -> String {
    let (global, local) = match verbosity {
        0 => ("warn", "info"),
        1 => ("warn", "debug"),
        2 => ("info", "trace"),
        _ => ("debug", "trace"),
    };
    format!("{global},circles_indexer={local}")
}

/// Initialize the global tracing subscriber, as plain text or JSON lines on stdout.
pub fn init_tracing(config: &IndexerConfig) {
    let log_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config.verbosity)));

    let json_layer = config.log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stdout)
    });
    let text_layer = (!config.log_json)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stdout));

    tracing_subscriber::registry()
        .with(log_filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}
