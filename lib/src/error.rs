use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::{DecodeError, SchemaError};
use crate::gate::DecompressionError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A filesystem operation that failed, and on which path
#[derive(Debug, Error)]
#[error("couldn't {action} {}: {source}", .path.display())]
pub struct IoError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl IoError {
    pub fn new(action: &'static str, path: &Path, source: io::Error) -> Self {
        IoError {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Decompression(#[from] DecompressionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl PipelineError {
    /// The error's name in reports and HTTP responses
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Io(_) => "IoError",
            PipelineError::Decompression(_) => "DecompressionError",
            PipelineError::Schema(_) => "SchemaError",
            PipelineError::Decode(_) => "DecodeError",
        }
    }
}
