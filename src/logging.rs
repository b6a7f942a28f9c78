//! Tracing subscriber setup.
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Fails if a subscriber is already installed, e.g. by a test harness.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let layer = fmt::layer().json().with_target(true).with_ansi(false);
        registry.with(layer).try_init()?;
    } else {
        let layer = fmt::layer().with_target(false);
        registry.with(layer).try_init()?;
    }

    Ok(())
}
