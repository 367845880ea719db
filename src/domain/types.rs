//! # Domain Types
//!
//! Common data structures and enums used across the application logic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// File operation requested by a `file` or `metadata` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileOperation {
    Create,
    Update,
    Delete,
}

impl FileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOperation::Create => "CREATE",
            FileOperation::Update => "UPDATE",
            FileOperation::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CREATE" => Some(FileOperation::Create),
            "UPDATE" | "MODIFY" | "EDIT" => Some(FileOperation::Update),
            "DELETE" | "REMOVE" => Some(FileOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical unit extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Explanation {
        text: String,
    },
    Shell {
        command: String,
    },
    File {
        operation: FileOperation,
        filename: String,
        content: Option<String>,
    },
    Metadata {
        operation: FileOperation,
        filename: String,
    },
    Restart {
        required: bool,
    },
}

impl Command {
    /// True for commands that change something on disk or in the process space.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            Command::Shell { .. } | Command::File { .. } | Command::Metadata { .. }
        )
    }

    /// Short human readable label used in progress output.
    pub fn describe(&self) -> String {
        match self {
            Command::Explanation { text } => {
                let first = text.lines().next().unwrap_or_default();
                format!("explanation: {first}")
            }
            Command::Shell { command } => format!("$ {command}"),
            Command::File {
                operation, filename, ..
            } => format!("{operation} {filename}"),
            Command::Metadata {
                operation,
                filename,
            } => format!("metadata {operation} {filename}"),
            Command::Restart { required } => format!("restart required: {required}"),
        }
    }
}

/// Category assigned to a dev server output line by the pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(alias = "ImportError", alias = "module_not_found")]
    Import,
    #[serde(alias = "SyntaxError", alias = "syntax")]
    Syntax,
    #[serde(alias = "CompileError", alias = "generic", alias = "error")]
    Compile,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Import => "ImportError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Compile => "CompileError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed error synthesized from dev server output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedError {
    pub kind: ErrorKind,
    /// The output line that matched.
    pub message: String,
    /// Recent output lines leading up to the match (oldest first).
    pub context: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_operation_from_str() {
        assert_eq!(FileOperation::from_str("create"), Some(FileOperation::Create));
        assert_eq!(FileOperation::from_str(" UPDATE "), Some(FileOperation::Update));
        assert_eq!(FileOperation::from_str("Delete"), Some(FileOperation::Delete));
        assert_eq!(FileOperation::from_str("rename"), None);
    }

    #[test]
    fn test_actionable() {
        assert!(Command::Shell { command: "ls".into() }.is_actionable());
        assert!(!Command::Restart { required: true }.is_actionable());
        assert!(!Command::Explanation { text: "x".into() }.is_actionable());
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Import.to_string(), "ImportError");
        let kind: ErrorKind = serde_yaml::from_str("SyntaxError").unwrap();
        assert_eq!(kind, ErrorKind::Syntax);
    }
}
