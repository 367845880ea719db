//! # Metadata Builder
//!
//! Populates the [`MetadataStore`](crate::infrastructure::metadata::MetadataStore):
//! walks the project, reads the manifests it recognises (`package.json`, `Cargo.toml`,
//! `requirements.txt`, `pyproject.toml`) and asks the model for a short description of
//! each source file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::application::interpreter::{extract_all_tags, extract_tag};
use crate::domain::config::MetadataConfig;
use crate::domain::paths;
use crate::domain::traits::{LlmProvider, MetadataHook};
use crate::domain::types::FileOperation;
use crate::infrastructure::metadata::{ProjectMetadata, SharedMetadata};
use crate::strings::prompts;

const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    ".nuxt",
    paths::DATA_DIR,
];

const SOURCE_EXTENSIONS: &[(&str, &str)] = &[
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("mjs", "JavaScript"),
    ("cjs", "JavaScript"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("vue", "JavaScript"),
    ("svelte", "JavaScript"),
    ("py", "Python"),
    ("rs", "Rust"),
    ("go", "Go"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("scss", "CSS"),
    ("sh", "Shell"),
];

/// What the model says about one file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileDescription {
    pub file_type: String,
    pub summary: String,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
}

impl FileDescription {
    fn parse(response: &str) -> Self {
        let items = |tag: &str| {
            extract_tag(response, tag)
                .map(|inner| extract_all_tags(&inner, "item"))
                .unwrap_or_default()
        };
        Self {
            file_type: extract_tag(response, "type").unwrap_or_else(|| "unknown".to_string()),
            summary: extract_tag(response, "summary").unwrap_or_default(),
            exports: items("exports"),
            imports: items("imports"),
        }
    }
}

pub struct MetadataBuilder {
    llm: Arc<dyn LlmProvider>,
    store: SharedMetadata,
    root: PathBuf,
    config: MetadataConfig,
}

impl MetadataBuilder {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        store: SharedMetadata,
        root: impl Into<PathBuf>,
        config: &MetadataConfig,
    ) -> Self {
        Self {
            llm,
            store,
            root: root.into(),
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &SharedMetadata {
        &self.store
    }

    fn skip_dir(&self, name: &str) -> bool {
        SKIP_DIRS.contains(&name)
            || self.config.ignore.iter().any(|i| i == name)
            || (name.starts_with('.') && name.len() > 1)
    }

    /// Whether `path` is a source file the index should describe.
    pub fn is_indexable(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        let in_skipped_dir = relative
            .parent()
            .into_iter()
            .flat_map(|p| p.components())
            .any(|c| self.skip_dir(&c.as_os_str().to_string_lossy()));
        !in_skipped_dir && language_of(path).is_some()
    }

    /// Source files under the root, as absolute paths in a stable order.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.skip_dir(&entry.file_name().to_string_lossy())
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || language_of(entry.path()).is_none() {
                continue;
            }
            let too_big = entry
                .metadata()
                .map(|m| m.len() > self.config.max_file_bytes)
                .unwrap_or(true);
            if too_big {
                tracing::debug!("Skipping large file {}", entry.path().display());
                continue;
            }
            files.push(entry.into_path());
        }
        files
    }

    /// Re-indexes the whole project from scratch. Returns the number of files described.
    pub async fn rebuild(&self) -> Result<usize> {
        let files = self.source_files();
        tracing::info!("Rebuilding metadata for {} files", files.len());

        {
            let mut store = self.store.lock().await;
            let mut fresh = ProjectMetadata::default();
            self.scan_project(&mut fresh, &files);
            *store.metadata_mut() = fresh;
        }

        for path in &files {
            self.index_file(path).await;
        }

        self.store.lock().await.save()?;
        Ok(files.len())
    }

    /// Re-describes `paths`; paths that no longer exist are dropped from the index.
    pub async fn update(&self, paths: &[PathBuf]) -> Result<usize> {
        let mut touched = 0;
        for path in paths {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.root.join(path)
            };
            if path.exists() {
                if !self.is_indexable(&path) {
                    tracing::debug!("Not indexing {}", path.display());
                    continue;
                }
                self.index_file(&path).await;
            } else {
                let relative = paths::relative_to(&self.root, &path);
                self.store.lock().await.remove_file_metadata(&relative);
            }
            touched += 1;
        }
        self.store.lock().await.save()?;
        Ok(touched)
    }

    /// Updates files changed since the last save, new files, and deleted files.
    pub async fn update_stale(&self) -> Result<usize> {
        let (last_updated, indexed): (Option<DateTime<Utc>>, BTreeSet<String>) = {
            let store = self.store.lock().await;
            let meta = store.metadata();
            (
                meta.last_updated,
                meta.key_files.iter().map(|f| f.path.clone()).collect(),
            )
        };

        let mut stale = Vec::new();
        let mut present = BTreeSet::new();
        for path in self.source_files() {
            let relative = paths::relative_to(&self.root, &path);
            let modified: Option<DateTime<Utc>> = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            let changed = match (last_updated, modified) {
                (Some(saved), Some(modified)) => modified > saved,
                _ => true,
            };
            if changed || !indexed.contains(&relative) {
                stale.push(path);
            }
            present.insert(relative);
        }
        stale.extend(
            indexed
                .difference(&present)
                .map(|relative| self.root.join(relative)),
        );

        tracing::info!("{} stale metadata entries", stale.len());
        self.update(&stale).await
    }

    /// Asks the model to describe one file.
    pub async fn describe_file(&self, path: &Path) -> Result<FileDescription> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let relative = paths::relative_to(&self.root, path);
        let prompt = prompts::describe_file_prompt(&relative, &content);
        let response = self.llm.call(&prompt).await?;
        Ok(FileDescription::parse(&response))
    }

    async fn index_file(&self, path: &Path) {
        let relative = paths::relative_to(&self.root, path);
        let description = match self.describe_file(path).await {
            Ok(description) => description,
            Err(e) => {
                tracing::warn!("Could not describe {}: {:#}", relative, e);
                FileDescription {
                    file_type: "unknown".to_string(),
                    ..Default::default()
                }
            }
        };
        self.store.lock().await.update_file_metadata(
            &relative,
            &description.file_type,
            &description.summary,
            description.exports,
            description.imports,
        );
    }

    /// Fills in everything that does not need the model.
    fn scan_project(&self, meta: &mut ProjectMetadata, files: &[PathBuf]) {
        meta.project_info.name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        meta.project_info.language = primary_language(files);

        let mut tree = serde_json::Map::new();
        for path in files {
            insert_path(&mut tree, &paths::relative_to(&self.root, path));
        }
        meta.directory_structure = serde_json::Value::Object(tree);

        if let Ok(content) = fs::read_to_string(self.root.join("package.json")) {
            meta.environment.manifests.push("package.json".to_string());
            self.scan_package_json(meta, &content);
        }
        if let Ok(content) = fs::read_to_string(self.root.join("Cargo.toml")) {
            meta.environment.manifests.push("Cargo.toml".to_string());
            meta.environment.package_manager.get_or_insert_with(|| "cargo".to_string());
            meta.external_dependencies
                .extend(cargo_dependencies(&content));
            if meta.dev_server.is_none() {
                meta.dev_server = Some(dev_server("cargo run"));
            }
        }
        if let Ok(content) = fs::read_to_string(self.root.join("requirements.txt")) {
            meta.environment.manifests.push("requirements.txt".to_string());
            meta.environment.package_manager.get_or_insert_with(|| "pip".to_string());
            meta.external_dependencies
                .extend(requirements_dependencies(&content));
        }
        if let Ok(content) = fs::read_to_string(self.root.join("pyproject.toml")) {
            meta.environment.manifests.push("pyproject.toml".to_string());
            meta.environment.package_manager.get_or_insert_with(|| "pip".to_string());
            meta.external_dependencies
                .extend(pyproject_dependencies(&content));
        }
        if meta.dev_server.is_none() {
            if self.root.join("manage.py").exists() {
                meta.dev_server = Some(dev_server("python manage.py runserver"));
            } else if self.root.join("app.py").exists() {
                meta.dev_server = Some(dev_server("python app.py"));
            }
        }
    }

    fn scan_package_json(&self, meta: &mut ProjectMetadata, content: &str) {
        let package: serde_json::Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Invalid package.json: {}", e);
                return;
            }
        };

        if let Some(name) = package["name"].as_str() {
            meta.project_info.name = name.to_string();
        }
        if let Some(description) = package["description"].as_str() {
            meta.project_info.description = Some(description.to_string());
        }

        let mut deps = BTreeSet::new();
        for section in ["dependencies", "devDependencies"] {
            if let Some(map) = package[section].as_object() {
                deps.extend(map.keys().cloned());
            }
        }
        meta.project_info.framework = ["next", "nuxt", "react", "vue", "svelte", "express", "vite"]
            .iter()
            .find(|f| deps.contains(**f))
            .map(|f| f.to_string());
        meta.external_dependencies.extend(deps);

        let manager = if self.root.join("pnpm-lock.yaml").exists() {
            "pnpm"
        } else if self.root.join("yarn.lock").exists() {
            "yarn"
        } else {
            "npm"
        };
        meta.environment.package_manager = Some(manager.to_string());

        let scripts = &package["scripts"];
        let command = if scripts["dev"].is_string() {
            Some(match manager {
                "npm" => "npm run dev".to_string(),
                other => format!("{other} dev"),
            })
        } else if scripts["start"].is_string() {
            Some(format!("{manager} start"))
        } else {
            None
        };
        if let Some(command) = command {
            let port = scripts["dev"]
                .as_str()
                .or(scripts["start"].as_str())
                .and_then(port_from_script);
            meta.dev_server = Some(crate::infrastructure::metadata::DevServer { command, port });
        }
    }
}

/// Keeps the index current after the executor touches a file.
pub struct MetadataUpdater {
    builder: Arc<MetadataBuilder>,
    pending: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl MetadataUpdater {
    pub fn new(builder: Arc<MetadataBuilder>) -> Self {
        Self {
            builder,
            pending: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Waits for updates spawned so far. Called before a one-shot command exits.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl MetadataHook for MetadataUpdater {
    fn file_changed(&self, path: &Path, operation: FileOperation) {
        if operation != FileOperation::Delete && !self.builder.is_indexable(path) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime, skipping metadata update for {}", path.display());
            return;
        };
        let builder = self.builder.clone();
        let path = path.to_path_buf();
        let handle = runtime.spawn(async move {
            if let Err(e) = builder.update(std::slice::from_ref(&path)).await {
                tracing::warn!("Metadata update for {} failed: {:#}", path.display(), e);
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

fn dev_server(command: &str) -> crate::infrastructure::metadata::DevServer {
    crate::infrastructure::metadata::DevServer {
        command: command.to_string(),
        port: None,
    }
}

fn language_of(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    SOURCE_EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

fn primary_language(files: &[PathBuf]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lang in files.iter().filter_map(|f| language_of(f)) {
        // Markup and styles rarely say what a project is written in.
        if !matches!(lang, "HTML" | "CSS" | "Shell") {
            *counts.entry(lang).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(lang, _)| lang.to_string())
}

fn insert_path(tree: &mut serde_json::Map<String, serde_json::Value>, relative: &str) {
    let mut parts: Vec<&str> = relative.split('/').collect();
    let Some(file) = parts.pop() else {
        return;
    };
    let mut node = tree;
    for dir in parts {
        let entry = node
            .entry(dir.to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        let serde_json::Value::Object(map) = entry else {
            return;
        };
        node = map;
    }
    node.insert(file.to_string(), serde_json::Value::String("file".to_string()));
}

fn port_from_script(script: &str) -> Option<u16> {
    let re = Regex::new(r"(?:--port[= ]|-p\s*|PORT=)(\d{2,5})").ok()?;
    re.captures(script)?.get(1)?.as_str().parse().ok()
}

fn cargo_dependencies(content: &str) -> Vec<String> {
    let Ok(entry) = Regex::new(r"^([A-Za-z0-9_-]+)\s*=") else {
        return Vec::new();
    };
    let mut deps = Vec::new();
    let mut in_deps = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_deps = matches!(line, "[dependencies]" | "[dev-dependencies]" | "[build-dependencies]");
            continue;
        }
        if in_deps && let Some(caps) = entry.captures(line) {
            deps.push(caps[1].to_string());
        }
    }
    deps
}

fn requirements_dependencies(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
        .filter_map(|l| {
            l.split(|c: char| "=<>~!;[ ".contains(c))
                .next()
                .map(str::to_string)
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn pyproject_dependencies(content: &str) -> Vec<String> {
    let (Ok(block), Ok(name)) = (
        Regex::new(r"(?s)\ndependencies\s*=\s*\[(.*?)\]"),
        Regex::new(r#"["']([A-Za-z0-9_.-]+)"#),
    ) else {
        return Vec::new();
    };
    let haystack = format!("\n{content}");
    block
        .captures(&haystack)
        .map(|caps| {
            name.captures_iter(&caps[1])
                .map(|c| c[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}
