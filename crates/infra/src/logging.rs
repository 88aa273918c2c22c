use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

/// Installs the global subscriber. `LOG_LEVEL` accepts any `EnvFilter`
/// directive; an unparsable one falls back to `info`.
pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|err| {
        eprintln!("invalid log level '{}': {err}; using info", config.log_level);
        EnvFilter::new("info")
    });
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json_logs() {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(false),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_target(false))
            .try_init()
    };
    installed.map_err(|err| anyhow!("tracing init failed: {err}"))
}
