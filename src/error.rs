//! Application-wide error types.

use thiserror::Error;

use crate::artifact::ArtifactError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    /// Unsupported platform or failed download. Always fatal.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("failed to start {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("delegation failed: {0}")]
    Delegation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("bad toml".into());
        assert!(e.to_string().contains("config error"));
        assert!(e.to_string().contains("bad toml"));
    }

    #[test]
    fn artifact_error_is_transparent() {
        let e: AppError = ArtifactError::UnsupportedPlatform("riscv64".into()).into();
        assert_eq!(e.to_string(), "unsupported platform: riscv64");
    }

    #[test]
    fn spawn_error_keeps_source() {
        let e = AppError::Spawn {
            name: "HY2".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(e.to_string().contains("HY2"));
        assert!(e.source().is_some());
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
