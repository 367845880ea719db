//! # Error Resolution Loop
//!
//! Invoked by the monitor when a dev server line matches an error pattern. Asks the
//! model for a fix, shows it, and applies it only after the user confirms. A restart
//! signalled by the model needs a second confirmation.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::application::context;
use crate::application::monitor::{ErrorResolution, MonitorHandle};
use crate::application::parsing::{Plan, parse_response};
use crate::domain::error::AssistantError;
use crate::domain::traits::{FileRelevanceFinder, LlmProvider, Prompter, Reporter};
use crate::domain::types::DetectedError;
use crate::infrastructure::metadata::SharedMetadata;
use crate::infrastructure::tools::executor::SharedExecutor;
use crate::strings::{messages, prompts};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Declined, or nothing was proposed.
    NotApplied,
    Applied { restart: bool },
    Failed { step: usize, message: String },
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionOutcome::NotApplied => write!(f, "no changes applied"),
            ResolutionOutcome::Applied { restart: true } => {
                write!(f, "fix applied, restart requested")
            }
            ResolutionOutcome::Applied { restart: false } => write!(f, "fix applied"),
            ResolutionOutcome::Failed { step, message } => {
                write!(f, "fix failed at step {step}: {message}")
            }
        }
    }
}

pub struct ResolutionLoop {
    llm: Arc<dyn LlmProvider>,
    finder: Arc<dyn FileRelevanceFinder>,
    executor: SharedExecutor,
    metadata: SharedMetadata,
    prompter: Arc<dyn Prompter>,
    reporter: Arc<dyn Reporter>,
    max_file_bytes: u64,
}

impl ResolutionLoop {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        finder: Arc<dyn FileRelevanceFinder>,
        executor: SharedExecutor,
        metadata: SharedMetadata,
        prompter: Arc<dyn Prompter>,
        reporter: Arc<dyn Reporter>,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            llm,
            finder,
            executor,
            metadata,
            prompter,
            reporter,
            max_file_bytes,
        }
    }

    async fn propose(&self, error: &DetectedError) -> Result<Plan, AssistantError> {
        let (root, cwd) = {
            let executor = self.executor.lock().await;
            (executor.root().to_path_buf(), executor.cwd().display().to_string())
        };
        let query = format!("{}: {}", error.kind, error.message);
        let ctx = context::gather(
            &self.metadata,
            self.finder.as_ref(),
            &query,
            &root,
            self.max_file_bytes,
        )
        .await;

        let prompt = prompts::resolution_prompt(error, &ctx.metadata, &ctx.files, &cwd);
        let response = self.llm.call(&prompt).await?;
        Ok(Plan::from_commands(parse_response(&response)?))
    }
}

#[async_trait]
impl ErrorResolution for ResolutionLoop {
    async fn resolve(
        &self,
        error: &DetectedError,
        monitor: &MonitorHandle,
    ) -> Result<ResolutionOutcome> {
        let plan = self.propose(error).await?;

        for text in &plan.explanations {
            self.reporter.explanation(text);
        }
        if plan.steps.is_empty() && !plan.restart {
            self.reporter.info(messages::NO_FIX_PROPOSED);
            return Ok(ResolutionOutcome::NotApplied);
        }

        for (i, step) in plan.steps.iter().enumerate() {
            self.reporter.step(i + 1, step);
        }
        if !plan.steps.is_empty() {
            if !self.prompter.confirm(messages::CONFIRM_FIXES).await {
                self.reporter.info(messages::DECLINED);
                return Ok(ResolutionOutcome::NotApplied);
            }

            let mut executor = self.executor.lock().await;
            for (i, step) in plan.steps.iter().enumerate() {
                match executor.execute(step).await {
                    Ok(output) => self.reporter.step_output(i + 1, &output),
                    Err(e) => {
                        let message = e.to_string();
                        tracing::warn!("Fix step {} failed: {}", i + 1, message);
                        self.reporter.warn(&messages::step_failed(i + 1, &message));
                        return Ok(ResolutionOutcome::Failed {
                            step: i + 1,
                            message,
                        });
                    }
                }
            }
        }

        let restart = plan.restart && self.prompter.confirm(messages::CONFIRM_RESTART).await;
        if restart {
            monitor.request_restart();
        }
        Ok(ResolutionOutcome::Applied { restart })
    }
}
