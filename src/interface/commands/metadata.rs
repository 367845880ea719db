//! # Metadata Command
//!
//! Builds or refreshes the project metadata index.

use anyhow::Result;
use std::path::PathBuf;

use crate::interface::Services;
use crate::strings::messages;

pub async fn handle_rebuild(services: &Services) -> Result<usize> {
    let count = services.builder.rebuild().await?;
    let path = services.metadata.lock().await.path().display().to_string();
    println!("{}", messages::metadata_rebuilt(count, &path));
    Ok(count)
}

/// Re-describes `paths`, or every new or removed file when none are given.
pub async fn handle_update(services: &Services, paths: &[PathBuf]) -> Result<usize> {
    let count = if paths.is_empty() {
        services.builder.update_stale().await?
    } else {
        services.builder.update(paths).await?
    };
    println!("{}", messages::metadata_updated(count));
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::ScriptedLlm;
    use crate::domain::config::AppConfig;
    use std::fs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rebuild_then_update_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.py"), "print('hi')").unwrap();
        let llm = Arc::new(ScriptedLlm::new(&[
            "<type>entry</type><summary>Prints hi</summary>",
            "<type>entry</type><summary>Prints bye</summary>",
        ]));
        let services = Services::with_llm(&root, AppConfig::default(), llm).unwrap();

        assert_eq!(handle_rebuild(&services).await.unwrap(), 1);
        assert!(root.join("project_metadata.json").exists());

        fs::write(root.join("src/main.py"), "print('bye')").unwrap();
        handle_update(&services, &[PathBuf::from("src/main.py")]).await.unwrap();
        let store = services.metadata.lock().await;
        assert_eq!(store.file("src/main.py").unwrap().summary, "Prints bye");
    }
}
