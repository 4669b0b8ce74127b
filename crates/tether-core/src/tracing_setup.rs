use std::fs::OpenOptions;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::Result;

/// Filter directives, e.g. `tether_core=debug`.
pub const LOG_ENV: &str = "TETHER_LOG";
/// Path of an optional append-only debug log.
pub const LOG_FILE_ENV: &str = "TETHER_LOG_FILE";

/// Install the global subscriber: stderr output filtered by `TETHER_LOG`
/// (default `info`), plus a debug-level file log when `TETHER_LOG_FILE` is set.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    if let Ok(log_path) = std::env::var(LOG_FILE_ENV) {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG);

        registry.with(file_layer).init();
        tracing::info!(path = %log_path, "file logging enabled");
    } else {
        registry.init();
    }
    Ok(())
}
