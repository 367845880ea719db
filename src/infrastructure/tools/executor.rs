//! # Command Executor
//!
//! Handles execution of parsed steps: shell commands and filesystem operations.
//! Enforces sandboxing through [`Sandbox`] and keeps its own working directory and
//! environment, so `cd` and `export` in one step are visible to the next.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::sandbox::{PermissionResult, Sandbox};
use crate::domain::config::CommandsConfig;
use crate::domain::error::ExecError;
use crate::domain::traits::MetadataHook;
use crate::domain::types::{Command, FileOperation};

/// Executes steps (shell, fs) inside the project root.
pub struct CommandExecutor {
    sandbox: Sandbox,
    cwd: PathBuf,
    env: HashMap<String, String>,
    timeout: Duration,
    metadata_hook: Option<Arc<dyn MetadataHook>>,
}

pub type SharedExecutor = Arc<Mutex<CommandExecutor>>;

impl CommandExecutor {
    pub fn new(root: &Path, config: &CommandsConfig) -> Result<Self> {
        let sandbox = Sandbox::new(root, &config.blocked)?;
        let cwd = sandbox.root().to_path_buf();
        Ok(Self {
            sandbox,
            cwd,
            env: std::env::vars().collect(),
            timeout: Duration::from_secs(config.timeout),
            metadata_hook: None,
        })
    }

    pub fn with_metadata_hook(mut self, hook: Arc<dyn MetadataHook>) -> Self {
        self.metadata_hook = Some(hook);
        self
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Runs one parsed step. Explanations and restart flags are no-ops that echo their text.
    pub async fn execute(&mut self, command: &Command) -> Result<String, ExecError> {
        match command {
            Command::Explanation { text } => Ok(text.clone()),
            Command::Shell { command } => self.execute_shell(command).await,
            Command::File {
                operation,
                filename,
                content,
            } => {
                let changed = self
                    .perform_file_operation(*operation, filename, content.as_deref())
                    .await?;
                Ok(if changed {
                    format!("{} {}", operation, filename)
                } else {
                    format!("{} {} (nothing to do)", operation, filename)
                })
            }
            Command::Metadata {
                operation,
                filename,
            } => {
                let path = self.sandbox.resolve_path(&self.cwd, filename)?;
                match &self.metadata_hook {
                    Some(hook) => {
                        hook.file_changed(&path, *operation);
                        Ok(format!("metadata {} queued for {}", operation, filename))
                    }
                    None => Ok(format!("metadata updates disabled, skipped {}", filename)),
                }
            }
            Command::Restart { required } => Ok(format!("restart required: {}", required)),
        }
    }

    /// Execute a shell command line in the tracked working directory.
    /// `&&` chains are run segment by segment so `cd` and variable assignments apply.
    pub async fn execute_shell(&mut self, command: &str) -> Result<String, ExecError> {
        if let PermissionResult::Blocked(pattern) = self.sandbox.check_command(command) {
            return Err(ExecError::Denied {
                command: command.to_string(),
                pattern,
            });
        }

        let mut output = String::new();
        for segment in self.sandbox.split_chain(command) {
            let result = self.run_segment(&segment).await?;
            if !result.is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&result);
            }
        }
        Ok(output)
    }

    async fn run_segment(&mut self, segment: &str) -> Result<String, ExecError> {
        let words: Vec<&str> = segment.split_whitespace().collect();
        match words.as_slice() {
            ["cd"] => {
                self.cwd = self.sandbox.root().to_path_buf();
                Ok(String::new())
            }
            ["cd", target] => {
                self.change_dir(target)?;
                Ok(String::new())
            }
            ["export", rest @ ..] | ["set", rest @ ..] if !rest.is_empty() => {
                for assignment in rest {
                    self.apply_assignment(assignment);
                }
                Ok(String::new())
            }
            ["source", file] | [".", file] => self.source(file).await,
            _ if !words.is_empty() && words.iter().all(|w| parse_assignment(w).is_some()) => {
                for assignment in &words {
                    self.apply_assignment(assignment);
                }
                Ok(String::new())
            }
            _ => self.spawn(segment).await,
        }
    }

    fn change_dir(&mut self, target: &str) -> Result<(), ExecError> {
        let resolved = self.sandbox.resolve_path(&self.cwd, target)?;
        if !resolved.is_dir() {
            return Err(ExecError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such directory: {}", target),
            )));
        }
        tracing::debug!("cwd -> {}", resolved.display());
        self.cwd = resolved;
        Ok(())
    }

    fn apply_assignment(&mut self, assignment: &str) {
        if let Some((key, value)) = parse_assignment(assignment) {
            tracing::debug!("env {}={}", key, value);
            self.env.insert(key, value);
        }
    }

    /// Runs `file` in a shell and folds the resulting environment changes back in.
    async fn source(&mut self, file: &str) -> Result<String, ExecError> {
        let path = self.sandbox.resolve_path(&self.cwd, file)?;
        let script = format!(". \"{}\" >/dev/null 2>&1 && env", path.display());
        let dump = self.spawn(&script).await?;

        let after: HashMap<String, String> = dump
            .lines()
            .filter_map(|line| line.split_once('='))
            .filter(|(key, _)| is_env_name(key))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut changed = 0;
        for (key, value) in &after {
            if self.env.get(key) != Some(value) {
                self.env.insert(key.clone(), value.clone());
                changed += 1;
            }
        }
        let removed: Vec<String> = self
            .env
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned()
            .collect();
        for key in &removed {
            self.env.remove(key);
        }

        Ok(format!(
            "sourced {} ({} variables changed, {} removed)",
            file,
            changed,
            removed.len()
        ))
    }

    async fn spawn(&self, command: &str) -> Result<String, ExecError> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = tokio::process::Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.args(["-c", command]);
            c
        };

        cmd.current_dir(&self.cwd)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!("Running `{}` in {}", command, self.cwd.display());
        let child = cmd.spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout(command.to_string()))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut result = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(stderr.trim_end());
        }

        if output.status.success() {
            Ok(result)
        } else {
            Err(ExecError::NonZeroExit {
                command: command.to_string(),
                code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                output: result,
            })
        }
    }

    /// Create, update or delete a file relative to the tracked working directory.
    /// Returns whether anything changed on disk.
    pub async fn perform_file_operation(
        &mut self,
        operation: FileOperation,
        filename: &str,
        content: Option<&str>,
    ) -> Result<bool, ExecError> {
        let path = self.sandbox.resolve_path(&self.cwd, filename)?;

        let changed = match operation {
            FileOperation::Create | FileOperation::Update => {
                let content = content.ok_or_else(|| ExecError::MissingContent(filename.to_string()))?;
                if let Some(parent) = path.parent()
                    && !parent.exists()
                {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, content).await?;
                tracing::info!("{} {}", operation, path.display());
                true
            }
            FileOperation::Delete => {
                if path.is_file() {
                    tokio::fs::remove_file(&path).await?;
                    tracing::info!("DELETE {}", path.display());
                    true
                } else {
                    tracing::warn!("DELETE {}: no such file", path.display());
                    false
                }
            }
        };

        if changed && let Some(hook) = &self.metadata_hook {
            hook.file_changed(&path, operation);
        }
        Ok(changed)
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses `KEY=value`, stripping one level of surrounding quotes from the value.
fn parse_assignment(word: &str) -> Option<(String, String)> {
    let (key, value) = word.split_once('=')?;
    if !is_env_name(key) {
        return None;
    }
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    Some((key.to_string(), value.to_string()))
}
