//! Logging setup and per-component macros
//!
//! Software rasterizer messages go to the `raster` target and Vulkan
//! backend messages to `gpu`, so `RUST_LOG=gpu=trace` isolates the GPU path.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, LogLevel};

/// Map a configured level onto a tracing level, `None` meaning logging is off
pub fn level_for(level: LogLevel) -> Option<Level> {
    match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    }
}

/// gpu-allocator logs every allocation at debug; cap it at warn
fn allocator_level(level: Level) -> Level {
    level.min(Level::WARN)
}

/// `RUST_LOG` plus the configured level, with the allocator capped
fn filter_for(level: Level) -> EnvFilter {
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let allocator = format!("gpu_allocator={}", allocator_level(level).as_str().to_lowercase());
    match allocator.parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Initialize the logging system based on configuration
pub fn init(config: &Config) {
    let Some(level) = level_for(config.debug.log_level) else {
        return;
    };

    let subscriber = tracing_subscriber::registry().with(filter_for(level)).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true),
    );

    if !config.debug.log_to_file {
        let _ = subscriber.try_init();
        return;
    }
    match std::fs::File::create(&config.debug.log_path) {
        Ok(file) => {
            let file_layer = fmt::layer().with_writer(file).with_ansi(false);
            let _ = subscriber.with(file_layer).try_init();
        }
        Err(e) => {
            let _ = subscriber.try_init();
            tracing::warn!("Cannot open log file {}: {e}", config.debug.log_path.display());
        }
    }
}

/// Log a software rasterizer trace message
#[macro_export]
macro_rules! raster_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "raster", $($arg)*)
    };
}

/// Log a software rasterizer debug message
#[macro_export]
macro_rules! raster_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "raster", $($arg)*)
    };
}

/// Log a GPU backend trace message
#[macro_export]
macro_rules! gpu_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "gpu", $($arg)*)
    };
}

/// Log a GPU backend debug message
#[macro_export]
macro_rules! gpu_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "gpu", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_for(LogLevel::Off), None);
        assert_eq!(level_for(LogLevel::Warn), Some(Level::WARN));
        assert_eq!(level_for(LogLevel::Trace), Some(Level::TRACE));
    }

    #[test]
    fn test_allocator_capped_at_warn() {
        assert_eq!(allocator_level(Level::TRACE), Level::WARN);
        assert_eq!(allocator_level(Level::INFO), Level::WARN);
        assert_eq!(allocator_level(Level::ERROR), Level::ERROR);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let mut config = Config::default();
        init(&config);
        config.debug.log_to_file = true;
        config.debug.log_path = std::env::temp_dir().join("no-such-dir-vh").join("vh.log");
        init(&config);
        raster_debug!("logging initialized");
        gpu_trace!(frame = 1, "second init ignored");
    }
}
