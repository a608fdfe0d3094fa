//! Tracing subscriber setup.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over `LOG_LEVEL`.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init(),
        LogFormat::Plain => subscriber.with(fmt::layer().with_target(true)).try_init(),
    }
}
