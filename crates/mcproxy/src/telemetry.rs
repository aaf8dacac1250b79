use std::str::FromStr;

use mcproxy_config::LoggingConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `RUST_LOG` is used when the configured
/// directive cannot be parsed.
pub fn init_logging(config: &LoggingConfig) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_ansi(config.use_color)
        .with_target(config.show_target);

    let filter = EnvFilter::from_str(&format!("mcproxy={}", config.level()))
        .unwrap_or_else(|_| EnvFilter::from_default_env());

    let registry = tracing_subscriber::registry().with(filter);

    // The two layer types differ, so each branch initializes on its own
    if config.show_timestamp {
        registry.with(fmt_layer).init();
    } else {
        registry.with(fmt_layer.without_time()).init();
    }
}
