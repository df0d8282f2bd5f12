//! Core support for the voodoo-hle renderer
//!
//! Configuration, error types and logging shared by the rendering crates
//! and the headless frontend.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{BackendPreference, Config, DebugConfig, LogLevel, RenderConfig};
pub use error::{ConfigError, RenderError, Result};
