use log::{error, info, log_enabled, warn, Level, LevelFilter};

/// Initializes the logger with the `env_logger` crate. `RUST_LOG` selects the level.
pub fn init_logger() {
    env_logger::init();
}

/// Initializes `env_logger` with a default level that `RUST_LOG` still overrides.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger_with_level(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}
