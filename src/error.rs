use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnagError {
    #[error("{tool} executable not found in PATH.")]
    ToolNotFound { tool: String },

    #[error("Input file not found: {}", .0.display())]
    InputMissing(PathBuf),

    /// A library entry whose file was moved or deleted since it was listed.
    #[error("File does not exist.")]
    FileMissing(PathBuf),

    #[error("Could not determine input file duration.")]
    DurationUnknown,

    #[error("Unsupported conversion type: {0}")]
    UnsupportedFormat(String),

    #[error("{tool} failed (code={code:?}): {message}")]
    ProcessFailure {
        tool: String,
        code: Option<i32>,
        message: String,
    },

    /// The download capability could not reach or extract the media.
    #[error("{0}")]
    Download(String),

    #[error("Please enter at least one URL.")]
    EmptyBatch,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SnagError {
    pub fn tool_not_found(tool: &str) -> Self {
        Self::ToolNotFound {
            tool: tool.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SnagError>;
