use anyhow::Context as _;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

// Logging goes to the console, and optionally also to a file that's opened in append mode.
// The log level can be set by configuring the RUST_LOG env variable, and defaults to "info".

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the tracing system. This should be called once at program startup;
/// calling it a second time is an error.
pub fn init_logging(path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let file_layer = match path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("Unable to open log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(env_filter()),
            )
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer().with_filter(env_filter());

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Logging was already initialized")?;
    Ok(())
}
