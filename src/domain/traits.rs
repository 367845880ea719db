//! # Domain Traits
//!
//! Abstract interfaces for the collaborators the core depends on (LLM, file finder,
//! terminal confirmation, metadata updates).
//! Allows for pluggable implementations in the Infrastructure layer and fakes in tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::types::{Command, FileOperation};
use crate::infrastructure::llm::Error;

/// Abstract interface for an LLM Provider
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion
    async fn call(&self, prompt: &str) -> Result<String, Error>;

    /// Generate a completion, handing each text delta to `on_chunk` as it arrives.
    /// Returns the full text.
    async fn stream(
        &self,
        prompt: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, Error>;

    /// Generate a completion for a prompt accompanied by an image file.
    async fn call_vision(&self, prompt: &str, image_path: &Path) -> Result<String, Error>;
}

/// Picks the project files worth showing the model for a given request.
#[async_trait]
pub trait FileRelevanceFinder: Send + Sync {
    async fn find_relevant_files(
        &self,
        query: &str,
        project_context: &str,
    ) -> anyhow::Result<Vec<PathBuf>>;
}

/// Asks the user a yes/no question. Anything but an explicit yes declines.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm(&self, question: &str) -> bool;
}

/// User-facing progress output for the query engine and the resolution loop.
pub trait Reporter: Send + Sync {
    /// Raw model text as it streams in (used by `ask`).
    fn text_chunk(&self, chunk: &str);
    fn explanation(&self, text: &str);
    /// A planned step, numbered from 1.
    fn step(&self, number: usize, command: &Command);
    fn step_output(&self, number: usize, output: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Notified after the executor changes a file on disk.
pub trait MetadataHook: Send + Sync {
    fn file_changed(&self, path: &Path, operation: FileOperation);
}

/// Parses a free-form yes/no answer. Empty input declines.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
