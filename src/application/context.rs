//! Project context gathered for a prompt: the metadata index plus the contents of the
//! files the relevance finder picked.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::paths;
use crate::domain::traits::FileRelevanceFinder;
use crate::infrastructure::metadata::SharedMetadata;

#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub metadata: String,
    pub files: String,
    pub paths: Vec<PathBuf>,
}

/// Collects metadata and relevant file contents for `query`. A failing finder only
/// costs the file section.
pub async fn gather(
    metadata: &SharedMetadata,
    finder: &dyn FileRelevanceFinder,
    query: &str,
    root: &Path,
    max_file_bytes: u64,
) -> PromptContext {
    let project_context = metadata.lock().await.get_project_context();

    let relevant = match finder.find_relevant_files(query, &project_context).await {
        Ok(paths) => paths,
        Err(e) => {
            tracing::warn!("Could not determine relevant files: {:#}", e);
            Vec::new()
        }
    };
    tracing::debug!("Relevant files: {:?}", relevant);

    PromptContext {
        files: read_files(root, &relevant, max_file_bytes),
        metadata: project_context,
        paths: relevant,
    }
}

/// Renders files as fenced blocks headed by their project-relative path.
pub fn read_files(root: &Path, files: &[PathBuf], max_bytes: u64) -> String {
    let mut out = String::new();
    for path in files {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let content = truncate(&content, max_bytes as usize);
        out.push_str(&format!(
            "## {}\n```\n{}\n```\n\n",
            paths::relative_to(root, path),
            content
        ));
    }
    out
}

const TRUNCATED_MARKER: &str = "\n... (truncated)";

/// Cuts `text` to at most `max` bytes on a char boundary and marks the cut.
fn truncate(text: &str, max: usize) -> Cow<'_, str> {
    if text.len() <= max {
        return Cow::Borrowed(text);
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}{}", &text[..end], TRUNCATED_MARKER))
}
