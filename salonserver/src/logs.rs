//! Logging initialisation.

use salonconfig::get_config;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingOptions {
    /// Default filter directive, overridable with `RUST_LOG`.
    pub level: String,
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            level: config.get_log_level(),
            enable_console: config.get_log_enable_console(),
        }
    }
}

/// Install the global tracing subscriber. Call once, early in main.
pub fn init_logging(options: &LoggingOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if options.enable_console {
        builder.init();
    } else {
        builder.with_writer(std::io::sink).init();
    }
}
