//! Error types for the AIE compiler driver

use std::path::PathBuf;
use thiserror::Error;

/// Result type for driver operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Driver errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to create working directory {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lexer error at position {position}: {message}")]
    Lexer { position: usize, message: String },

    #[error("Parser error: {message}")]
    Parse { message: String },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Unexpected target architecture: {arch}")]
    UnexpectedTargetArch { arch: String },

    #[error("Translation to {target} failed: {message}")]
    Translation { target: String, message: String },

    #[error("Failed to open output {}: {source}", path.display())]
    ArtifactOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Write(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to launch {program}: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}")]
    ToolFailed { program: String, code: i32 },
}

impl CompileError {
    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::Config { message: msg.into() }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        CompileError::Parse { message: msg.into() }
    }

    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        CompileError::StageFailed {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    pub fn translation(target: impl Into<String>, msg: impl Into<String>) -> Self {
        CompileError::Translation {
            target: target.into(),
            message: msg.into(),
        }
    }
}

impl From<std::fmt::Error> for CompileError {
    fn from(_: std::fmt::Error) -> Self {
        CompileError::translation("text", "formatting failed")
    }
}
