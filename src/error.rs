use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackerError {
    #[error("No workspace or source directory found at {0}")]
    NoWorkspaceRoot(PathBuf),

    #[error("No Git repository found for {0}")]
    NoRepositoryFound(PathBuf),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Failed to write output file {path}: {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    PerFileReadFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to diff {path}: {reason}")]
    PerFileDiffFailed { path: String, reason: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    PatternCompileFailed { pattern: String, reason: String },

    #[error("Git error: {0}")]
    Git(String),
}

pub type PackerResult<T> = Result<T, PackerError>;
