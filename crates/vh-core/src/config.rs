//! Renderer configuration
//!
//! Loaded from `<config_dir>/voodoo-hle/config.toml`. Every field has a
//! default, so a partial (or missing) file is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Largest framebuffer the chip can scan out
pub const MAX_WIDTH: u32 = 800;
pub const MAX_HEIGHT: u32 = 600;

/// Default framebuffer size
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub render: RenderConfig,
    pub debug: DebugConfig,
}

/// Which rendering backend to construct at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Probe for Vulkan and use it when usable, else software
    #[default]
    Auto,
    /// Always construct the Vulkan backend (it still falls back internally)
    Vulkan,
    /// Software rasterizer only
    Software,
}

/// Rendering options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub backend: BackendPreference,
    pub width: u32,
    pub height: u32,
    /// Directory holding `voodoo.vert.spv` and `voodoo.frag.spv`
    pub shader_dir: Option<PathBuf>,
    /// Enable the Khronos validation layer on the Vulkan instance
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            shader_dir: None,
            validation: false,
        }
    }
}

impl RenderConfig {
    /// Framebuffer dimensions clamped to what the chip supports
    pub fn dimensions(&self) -> (u32, u32) {
        (
            self.width.clamp(1, MAX_WIDTH),
            self.height.clamp(1, MAX_HEIGHT),
        )
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Diagnostics options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            log_path: PathBuf::from("voodoo-hle.log"),
        }
    }
}

impl Config {
    /// Path of the per-user config file, if a config directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voodoo-hle").join("config.toml"))
    }

    /// Load the per-user config, returning defaults when no file exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Write configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.render.backend, BackendPreference::Auto);
        assert_eq!(config.render.dimensions(), (640, 480));
        assert_eq!(config.debug.log_level, LogLevel::Info);
        assert!(!config.debug.log_to_file);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [render]
            backend = "software"
            width = 320
            "#,
        )
        .unwrap();
        assert_eq!(config.render.backend, BackendPreference::Software);
        assert_eq!(config.render.width, 320);
        assert_eq!(config.render.height, DEFAULT_HEIGHT);
        assert_eq!(config.debug, DebugConfig::default());
    }

    #[test]
    fn test_dimensions_clamped() {
        let render = RenderConfig {
            width: 4096,
            height: 0,
            ..Default::default()
        };
        assert_eq!(render.dimensions(), (MAX_WIDTH, 1));
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[render]\nwidth = \"wide\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("vh-core-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.render.backend = BackendPreference::Vulkan;
        config.render.shader_dir = Some(PathBuf::from("/opt/shaders"));
        config.debug.log_level = LogLevel::Trace;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(&dir);
    }
}
