use std::path::PathBuf;

use thiserror::Error;

use crate::backup::layout::Tier;

#[derive(Error, Debug)]
pub enum RotateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No usable compressor: {0}")]
    UnavailableCodec(String),

    #[error("Cannot run as '{principal}': {reason}")]
    Permission { principal: String, reason: String },

    #[error("Command execution failed ({status}): {stderr}")]
    Command {
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Compression of {path} failed: {reason}")]
    Compression { path: PathBuf, reason: String },

    #[error("Partial fan-out for {}: missing {missing:?}", master.display())]
    PartialFanout { master: PathBuf, missing: Vec<Tier> },
}

impl RotateError {
    /// Wraps an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RotateError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RotateError>;
