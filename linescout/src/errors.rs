/// Error types for linescout runs.
///
/// Errors fall into two groups. Recoverable errors are produced by a single line
/// scan (`ScanError`) or a single pattern evaluation on the device
/// (`PatternCompile`, `PatternEval`); the orchestrator logs them and carries on.
/// Everything else is fatal for the run and propagates with `?` up to the caller:
///
/// ```rust,ignore
/// match linescout::search::run(&config, &patterns, &lines) {
///     Ok(output) => // Write output.table, report output.summary,
///     Err(MatchError::ConfigError(msg)) => // Rejected before any matching work,
///     Err(e) => // Device or resource failure, run aborted
/// }
/// ```
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for matching operations
pub type MatchResult<T> = Result<T, MatchError>;

/// Errors that can occur while loading inputs or running a match
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid pattern {id}: {reason}")]
    InvalidPattern { id: usize, reason: String },
    #[error("Scan error: {0}")]
    ScanError(String),
    #[error("Pattern {id} failed to compile for the device: {reason}")]
    PatternCompile { id: usize, reason: String },
    #[error("Pattern {id} failed to evaluate on the device: {reason}")]
    PatternEval { id: usize, reason: String },
    #[error("Device allocation of {requested} bytes failed ({in_use} of {capacity} bytes in use)")]
    DeviceAllocation {
        requested: u64,
        in_use: u64,
        capacity: u64,
    },
    #[error("Device error: {0}")]
    Device(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Result aggregation error: {0}")]
    Aggregation(String),
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid UTF-8 in file {path}: {source}")]
    EncodingError {
        path: PathBuf,
        source: std::str::Utf8Error,
    },
    #[error("Config file error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MatchError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_pattern(id: usize, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            id,
            reason: reason.into(),
        }
    }

    pub fn scan_error(msg: impl Into<String>) -> Self {
        Self::ScanError(msg.into())
    }

    pub fn pattern_compile(id: usize, reason: impl Into<String>) -> Self {
        Self::PatternCompile {
            id,
            reason: reason.into(),
        }
    }

    pub fn pattern_eval(id: usize, reason: impl Into<String>) -> Self {
        Self::PatternEval {
            id,
            reason: reason.into(),
        }
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn aggregation(msg: impl Into<String>) -> Self {
        Self::Aggregation(msg.into())
    }

    /// Maps an IO error on `path` to the matching variant
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::IoError(err),
        }
    }

    pub fn encoding_error(path: impl Into<PathBuf>, source: std::str::Utf8Error) -> Self {
        Self::EncodingError {
            path: path.into(),
            source,
        }
    }

    /// True for failures scoped to one pattern on one chunk.
    pub fn is_pattern_error(&self) -> bool {
        matches!(self, Self::PatternCompile { .. } | Self::PatternEval { .. })
    }
}
