//! Tracing init. Call once at process startup.

use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the global tracing subscriber from `ObservabilityConfig`.
/// Safe to call more than once (subsequent calls are no-ops via
/// `try_init`'s error being swallowed) — useful in tests that each spin up
/// their own runtime.
pub fn init(config: &ObservabilityConfig) {
    let level = if config.quiet {
        "wayforge=warn".to_string()
    } else {
        config.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
}

/// Convenience wrapper reading config straight from the environment.
pub fn init_from_env() {
    init(&ObservabilityConfig::from_env());
}
