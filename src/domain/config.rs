//! # Configuration
//!
//! Manages the loading and parsing of the assistant's configuration file (`config.yaml`).
//! Every section is optional; missing values fall back to the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::domain::paths;
use crate::domain::types::ErrorKind;

/// Main application configuration structure.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Loads `<root>/.devpilot/config.yaml`, then the user config, else defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let candidates = std::iter::once(paths::project_config_path(root))
            .chain(paths::user_config_path());

        for path in candidates {
            if path.exists() {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let config: AppConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                tracing::debug!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
        }

        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }
}

/// Which model endpoint to call and how.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>, // e.g. "ANTHROPIC_API_KEY"
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            endpoint: None,
            api_key: None,
            api_key_env: None,
            timeout: None,
            max_tokens: default_max_tokens(),
            max_continuations: default_max_continuations(),
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_max_continuations() -> u32 {
    3
}

/// Shell execution policy.
#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    /// Extra denylist regexes, checked in addition to the built-in ones.
    #[serde(default)]
    pub blocked: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub timeout: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            blocked: Vec::new(),
            timeout: default_command_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    300
}

/// Dev server supervision tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_idle_secs")]
    pub idle_secs: f64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_error_buffer")]
    pub error_buffer: usize,
    /// Evaluated before the built-in patterns.
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            idle_secs: default_idle_secs(),
            poll_ms: default_poll_ms(),
            error_buffer: default_error_buffer(),
            patterns: Vec::new(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_idle_secs() -> f64 {
    5.0
}
fn default_poll_ms() -> u64 {
    100
}
fn default_error_buffer() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatternConfig {
    pub pattern: String,
    pub kind: ErrorKind,
}

/// Metadata index settings.
#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_file")]
    pub file: String,
    /// Extra directory names to skip while walking the project.
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            file: default_metadata_file(),
            ignore: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_metadata_file() -> String {
    paths::METADATA_FILE.to_string()
}
fn default_max_file_bytes() -> u64 {
    100_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.monitor.max_retries, 3);
        assert_eq!(config.monitor.poll_ms, 100);
        assert_eq!(config.monitor.error_buffer, 10);
        assert_eq!(config.metadata.file, "project_metadata.json");
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
llm:
  provider: openai
  model: gpt-4o
  api_key_env: OPENAI_API_KEY
monitor:
  idle_secs: 2.5
  patterns:
    - pattern: "EADDRINUSE"
      kind: CompileError
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.monitor.idle_secs, 2.5);
        assert_eq!(config.monitor.max_retries, 3);
        assert_eq!(config.monitor.patterns[0].kind, ErrorKind::Compile);
        assert_eq!(config.commands.timeout, 300);
    }

    #[test]
    fn test_load_project_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".devpilot")).unwrap();
        std::fs::write(
            dir.path().join(".devpilot/config.yaml"),
            "commands:\n  timeout: 12\n",
        )
        .unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.commands.timeout, 12);
    }
}
