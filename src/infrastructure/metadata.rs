//! # Project Metadata Store
//!
//! A JSON index of the project kept at the project root (`project_metadata.json` by
//! default). It is the compact "project context" handed to the model: what the project
//! is, how to run it, and a one-line summary of each key file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    /// Manifest files found at the root (`package.json`, `Cargo.toml`, ...).
    #[serde(default)]
    pub manifests: Vec<String>,
    #[serde(default)]
    pub package_manager: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DevServer {
    pub command: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub path: String,
    #[serde(rename = "type", default)]
    pub file_type: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
}

/// On-disk document.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub project_info: ProjectInfo,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub directory_structure: serde_json::Value,
    #[serde(default)]
    pub key_files: Vec<FileEntry>,
    #[serde(default)]
    pub external_dependencies: BTreeSet<String>,
    #[serde(default)]
    pub dev_server: Option<DevServer>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

pub type SharedMetadata = Arc<Mutex<MetadataStore>>;

#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    data: ProjectMetadata,
}

impl MetadataStore {
    /// Loads the index at `path`, or starts an empty one if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            tracing::debug!("No metadata at {}, starting empty", path.display());
            ProjectMetadata::default()
        };
        Ok(Self { path, data })
    }

    pub fn shared(self) -> SharedMetadata {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn metadata(&self) -> &ProjectMetadata {
        &self.data
    }

    pub fn metadata_mut(&mut self) -> &mut ProjectMetadata {
        &mut self.data
    }

    /// Stamps `last_updated` and writes the index as pretty JSON.
    pub fn save(&mut self) -> Result<()> {
        self.data.last_updated = Some(Utc::now());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        tracing::debug!("Saved metadata ({} files)", self.data.key_files.len());
        Ok(())
    }

    /// The whole index as a JSON string, for prompts.
    pub fn get_project_context(&self) -> String {
        serde_json::to_string_pretty(&self.data).unwrap_or_else(|_| "{}".to_string())
    }

    /// Inserts or replaces the entry for `path`.
    pub fn update_file_metadata(
        &mut self,
        path: &str,
        file_type: &str,
        summary: &str,
        exports: Vec<String>,
        imports: Vec<String>,
    ) {
        let entry = FileEntry {
            path: path.to_string(),
            file_type: file_type.to_string(),
            summary: summary.to_string(),
            exports,
            imports,
        };
        match self.data.key_files.iter_mut().find(|f| f.path == path) {
            Some(existing) => *existing = entry,
            None => {
                self.data.key_files.push(entry);
                self.data.key_files.sort_by(|a, b| a.path.cmp(&b.path));
            }
        }
    }

    /// Returns true if an entry was removed.
    pub fn remove_file_metadata(&mut self, path: &str) -> bool {
        let before = self.data.key_files.len();
        self.data.key_files.retain(|f| f.path != path);
        before != self.data.key_files.len()
    }

    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.data.key_files.iter().find(|f| f.path == path)
    }

    pub fn set_dev_server(&mut self, command: &str, port: Option<u16>) {
        self.data.dev_server = Some(DevServer {
            command: command.to_string(),
            port,
        });
    }

    pub fn dev_server_command(&self) -> Option<&str> {
        self.data.dev_server.as_ref().map(|d| d.command.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project_metadata.json");

        let mut store = MetadataStore::open(&path).unwrap();
        assert!(!store.exists());
        store.metadata_mut().project_info.name = "shop".into();
        store.metadata_mut().external_dependencies.insert("express".into());
        store.set_dev_server("npm run dev", Some(3000));
        store.update_file_metadata(
            "src/server.js",
            "entrypoint",
            "Express app setup",
            vec!["app".into()],
            vec!["express".into()],
        );
        store.save().unwrap();

        let reloaded = MetadataStore::open(&path).unwrap();
        assert_eq!(reloaded.metadata(), store.metadata());
        assert!(reloaded.metadata().last_updated.is_some());
        let entry = reloaded.file("src/server.js").unwrap();
        assert_eq!(entry.summary, "Express app setup");
        assert_eq!(entry.file_type, "entrypoint");
        assert_eq!(reloaded.dev_server_command(), Some("npm run dev"));
    }

    #[test]
    fn test_upsert_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::open(dir.path().join("m.json")).unwrap();

        store.update_file_metadata("b.js", "module", "first", vec![], vec![]);
        store.update_file_metadata("a.js", "module", "other", vec![], vec![]);
        store.update_file_metadata("b.js", "module", "second", vec![], vec![]);

        let paths: Vec<_> = store.metadata().key_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.js", "b.js"]);
        assert_eq!(store.file("b.js").unwrap().summary, "second");

        assert!(store.remove_file_metadata("a.js"));
        assert!(!store.remove_file_metadata("a.js"));
        assert!(store.file("a.js").is_none());
    }

    #[test]
    fn test_file_type_serialized_as_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::open(dir.path().join("m.json")).unwrap();
        store.update_file_metadata("x.py", "script", "does x", vec![], vec![]);

        let json: serde_json::Value = serde_json::from_str(&store.get_project_context()).unwrap();
        assert_eq!(json["key_files"][0]["type"], "script");
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(MetadataStore::open(&path).is_err());
    }
}
