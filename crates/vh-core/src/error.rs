//! Error types

use std::io;
use thiserror::Error;

/// Errors a caller can observe from a rendering backend.
///
/// Accelerated-path setup failures never appear here: they are logged and
/// the backend keeps running on the software rasterizer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Texture size mismatch: expected {expected} bytes, got {actual}")]
    TextureSizeMismatch { expected: usize, actual: usize },
    #[error("Texture upload failed: {0}")]
    TextureUpload(String),
}

/// Errors raised while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_message() {
        let err = RenderError::TextureSizeMismatch { expected: 16, actual: 12 };
        assert_eq!(
            err.to_string(),
            "Texture size mismatch: expected 16 bytes, got 12"
        );
    }

    #[test]
    fn test_upload_message() {
        let err = RenderError::TextureUpload("Buffer memory is not host-mapped".into());
        assert_eq!(err.to_string(), "Texture upload failed: Buffer memory is not host-mapped");
    }

    #[test]
    fn test_config_error_from_io() {
        let err: ConfigError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
