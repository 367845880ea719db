//! Model-driven file selection: the model reads the metadata index and names the
//! files worth including in a prompt.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::application::interpreter::extract_all_tags;
use crate::domain::traits::{FileRelevanceFinder, LlmProvider};
use crate::strings::prompts;

pub const MAX_RELEVANT_FILES: usize = 10;

pub struct LlmRelevanceFinder {
    llm: Arc<dyn LlmProvider>,
    root: PathBuf,
}

impl LlmRelevanceFinder {
    pub fn new(llm: Arc<dyn LlmProvider>, root: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            root: root.into(),
        }
    }

    /// Keeps relative paths that name an existing file under the root.
    fn accept(&self, candidate: &str) -> Option<PathBuf> {
        let candidate = candidate.trim().trim_start_matches("./");
        let relative = Path::new(candidate);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return None;
        }
        let path = self.root.join(relative);
        path.is_file().then_some(path)
    }
}

#[async_trait]
impl FileRelevanceFinder for LlmRelevanceFinder {
    async fn find_relevant_files(&self, query: &str, project_context: &str) -> Result<Vec<PathBuf>> {
        let prompt = prompts::relevant_files_prompt(query, project_context, MAX_RELEVANT_FILES);
        let response = self.llm.call(&prompt).await?;

        let mut files = Vec::new();
        for candidate in extract_all_tags(&response, "file") {
            match self.accept(&candidate) {
                Some(path) if !files.contains(&path) => files.push(path),
                Some(_) => {}
                None => tracing::debug!("Ignoring suggested file {}", candidate),
            }
            if files.len() == MAX_RELEVANT_FILES {
                break;
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::ScriptedLlm;
    use std::fs;

    #[tokio::test]
    async fn test_filters_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/app.js"), "").unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();

        let llm = Arc::new(ScriptedLlm::new(&[
            "<files><file>src/app.js</file><file>./package.json</file><file>src/app.js</file>\
             <file>src/missing.js</file><file>../outside.txt</file><file>/etc/passwd</file><file>src</file></files>",
        ]));
        let finder = LlmRelevanceFinder::new(llm.clone(), root);

        let files = finder.find_relevant_files("fix the app", "{}").await.unwrap();
        assert_eq!(files, vec![root.join("src/app.js"), root.join("package.json")]);
        assert!(llm.prompt(0).contains("fix the app"));
    }

    #[tokio::test]
    async fn test_caps_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut reply = String::from("<files>");
        for i in 0..15 {
            fs::write(dir.path().join(format!("f{i}.txt")), "").unwrap();
            reply.push_str(&format!("<file>f{i}.txt</file>"));
        }
        reply.push_str("</files>");

        let finder = LlmRelevanceFinder::new(Arc::new(ScriptedLlm::new(&[&reply])), dir.path());
        let files = finder.find_relevant_files("q", "{}").await.unwrap();
        assert_eq!(files.len(), MAX_RELEVANT_FILES);
    }
}
