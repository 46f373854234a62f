use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Error, Result};

/// Installs the global subscriber. `level` is an `EnvFilter` directive
/// string (`info`, `avocado_repo=debug,warn`, ...). Logs go to stderr so
/// stdout stays clean for printed results.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| Error::msg(format!("invalid log filter '{level}': {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    res.map_err(|e| Error::msg(format!("failed to install log subscriber: {e}")))
}
