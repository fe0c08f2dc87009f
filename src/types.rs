// Core error types for menuscan
use std::path::PathBuf;
use std::time::Duration;

/// Failures while turning uploaded bytes into page images.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page rasterization failed: {0}")]
    Rasterize(String),

    #[error("preprocessing failed: {0}")]
    Preprocess(String),
}

/// Failures from one recognition engine invocation.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("could not start recognition engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("recognition engine exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not encode page for recognition: {0}")]
    Encode(String),

    #[error("recognition worker pool is closed")]
    PoolClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
