use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info", "warn",
/// "stipple_engine=debug,wgpu=warn"). When unset, `RUST_LOG` is used, then
/// `info`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Include the emitting module path in each record.
    pub module_path: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            module_path: true,
        }
    }
}

impl LoggingConfig {
    /// Config with an explicit filter, e.g. `"stipple_engine=trace"`.
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self { env_filter: Some(filter.into()), ..Self::default() }
    }
}

static INIT: Once = Once::new();

/// Initializes the global logger once.
///
/// Idempotent; later calls are ignored. Uses `try_init` so a logger
/// installed by a host application is left in place.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.env_filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }

        builder.write_style(config.write_style);
        builder.format_module_path(config.module_path);

        if builder.try_init().is_err() {
            log::debug!("logger already installed; init_logging skipped");
            return;
        }
        log::debug!("logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_logging(LoggingConfig::with_filter("stipple_engine=debug"));
        init_logging(LoggingConfig::default());
        log::debug!("still logging");
    }

    #[test]
    fn filter_constructor_keeps_defaults() {
        let c = LoggingConfig::with_filter("warn");
        assert_eq!(c.env_filter.as_deref(), Some("warn"));
        assert!(c.module_path);
    }
}
