//! # Error Taxonomy
//!
//! Typed failures shared by the executor, the query engine and the monitor.
//! Declining a confirmation is not an error; it is reported through outcome enums.

use std::path::PathBuf;
use thiserror::Error;

use crate::infrastructure::llm::Error as LlmError;

/// Failure of a single shell command or file operation.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command rejected by denylist ({pattern}): {command}")]
    Denied { command: String, pattern: String },

    #[error("path escapes the project root: {}", .0.display())]
    OutsideRoot(PathBuf),

    #[error("command `{command}` exited with {code}:\n{output}")]
    NonZeroExit {
        command: String,
        code: String,
        output: String,
    },

    #[error("command `{0}` timed out")]
    Timeout(String),

    #[error("missing content for {0}")]
    MissingContent(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Application-level failures, surfaced to the user.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("step {step} failed: {message}")]
    Execution { step: usize, message: String },

    #[error("API error: {0}")]
    Api(#[from] LlmError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("dev server could not be restarted after {attempts} attempts")]
    FatalSupervision { attempts: u32 },

    #[error("giving up after {depth} fix attempts")]
    FixDepthExceeded { depth: usize },
}
