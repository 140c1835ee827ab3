//! Logging bootstrap: level filter plus a URL-addressed target.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use myfab_config::{Error, LogTarget, Logging};

/// Install the global subscriber. Call once, early.
pub fn setup(config: &Logging) -> Result<(), Error> {
    let filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.target()? {
        LogTarget::Console => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogTarget::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| {
                    Error::LogTarget(path.display().to_string(), err.to_string())
                })?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
    }
    Ok(())
}
