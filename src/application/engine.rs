//! # Query Engine
//!
//! Drives a user request end to end: gather context, stream the model's answer through
//! the [`StreamInterpreter`], confirm, execute, and on failure go back to the model for
//! fix commands. Fix rounds are counted explicitly and capped at [`MAX_FIX_DEPTH`].

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::context::{self, PromptContext};
use crate::application::interpreter::StreamInterpreter;
use crate::application::monitor::QueryRunner;
use crate::application::parsing::{Plan, parse_response};
use crate::domain::error::AssistantError;
use crate::domain::traits::{FileRelevanceFinder, LlmProvider, Prompter, Reporter};
use crate::domain::types::Command;
use crate::infrastructure::metadata::SharedMetadata;
use crate::infrastructure::tools::executor::SharedExecutor;
use crate::strings::{messages, prompts};

pub const MAX_FIX_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Completed { steps: usize },
    Declined,
    NothingToDo,
}

/// A step that failed inside a batch. `index` is 0-based within the batch.
struct BatchFailure {
    index: usize,
    message: String,
}

pub struct QueryEngine {
    llm: Arc<dyn LlmProvider>,
    finder: Arc<dyn FileRelevanceFinder>,
    executor: SharedExecutor,
    metadata: SharedMetadata,
    prompter: Arc<dyn Prompter>,
    reporter: Arc<dyn Reporter>,
    auto_confirm: bool,
    max_file_bytes: u64,
}

impl QueryEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        finder: Arc<dyn FileRelevanceFinder>,
        executor: SharedExecutor,
        metadata: SharedMetadata,
        prompter: Arc<dyn Prompter>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            llm,
            finder,
            executor,
            metadata,
            prompter,
            reporter,
            auto_confirm: false,
            max_file_bytes: 100_000,
        }
    }

    /// Skip confirmations (`--yes`).
    pub fn auto_confirm(mut self, yes: bool) -> Self {
        self.auto_confirm = yes;
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    async fn locations(&self) -> (PathBuf, String) {
        let executor = self.executor.lock().await;
        (
            executor.root().to_path_buf(),
            executor.cwd().display().to_string(),
        )
    }

    async fn gather(&self, query: &str, root: &Path) -> PromptContext {
        context::gather(
            &self.metadata,
            self.finder.as_ref(),
            query,
            root,
            self.max_file_bytes,
        )
        .await
    }

    /// Answers a question about the project. Nothing is executed.
    pub async fn ask(&self, question: &str) -> Result<String, AssistantError> {
        let (root, _) = self.locations().await;
        let ctx = self.gather(question, &root).await;
        let prompt = prompts::ask_prompt(question, &ctx.metadata, &ctx.files);

        let reporter = self.reporter.clone();
        let mut on_chunk = |chunk: &str| reporter.text_chunk(chunk);
        Ok(self.llm.stream(&prompt, &mut on_chunk).await?)
    }

    /// Generates and applies steps for `query`.
    pub async fn run_query(&self, query: &str) -> Result<QueryOutcome, AssistantError> {
        let (root, cwd) = self.locations().await;
        let ctx = self.gather(query, &root).await;
        let prompt = prompts::query_prompt(query, &ctx.metadata, &ctx.files, &cwd);

        let commands = self.stream_commands(&prompt).await?;
        // Explanations were already shown while streaming.
        let plan = Plan::from_commands(commands);
        self.apply(query, plan.steps).await
    }

    /// Like [`run_query`](Self::run_query), with an image attached to the request.
    pub async fn run_image_query(
        &self,
        image: &Path,
        instructions: &str,
    ) -> Result<QueryOutcome, AssistantError> {
        let (_, cwd) = self.locations().await;
        let project_context = self.metadata.lock().await.get_project_context();
        let prompt = prompts::image_prompt(instructions, &project_context, &cwd);

        let response = self.llm.call_vision(&prompt, image).await?;
        let plan = Plan::from_commands(parse_response(&response)?);
        for text in &plan.explanations {
            self.reporter.explanation(text);
        }
        let request = format!("(image {}) {}", image.display(), instructions);
        self.apply(&request, plan.steps).await
    }

    /// Streams a response, showing explanations as soon as they are complete.
    async fn stream_commands(&self, prompt: &str) -> Result<Vec<Command>, AssistantError> {
        let mut interpreter = StreamInterpreter::new();
        let mut commands = Vec::new();
        let reporter = self.reporter.clone();

        let full = {
            let mut on_chunk = |chunk: &str| {
                for command in interpreter.feed(chunk) {
                    if let Command::Explanation { text } = &command {
                        reporter.explanation(text);
                    }
                    commands.push(command);
                }
            };
            self.llm.stream(prompt, &mut on_chunk).await?
        };

        if let Some(rest) = interpreter.flush() {
            tracing::warn!("Unparsed model output: {}", rest.trim());
            self.reporter.warn(&messages::unparsed_output(rest.trim()));
        }
        if commands.is_empty() {
            let preview: String = full.trim().chars().take(200).collect();
            return Err(AssistantError::Parse(format!(
                "no explanation or steps found in response: {preview}"
            )));
        }
        Ok(commands)
    }

    async fn confirm(&self, question: &str) -> bool {
        self.auto_confirm || self.prompter.confirm(question).await
    }

    fn show(&self, steps: &[Command]) {
        for (i, step) in steps.iter().enumerate() {
            self.reporter.step(i + 1, step);
        }
    }

    /// Confirms and executes `steps`, then runs the fix loop on failure.
    async fn apply(&self, request: &str, steps: Vec<Command>) -> Result<QueryOutcome, AssistantError> {
        if steps.is_empty() {
            self.reporter.info(messages::NOTHING_TO_DO);
            return Ok(QueryOutcome::NothingToDo);
        }
        self.show(&steps);
        if !self.confirm(messages::CONFIRM_STEPS).await {
            self.reporter.info(messages::DECLINED);
            return Ok(QueryOutcome::Declined);
        }

        let mut batch = steps;
        let mut completed = 0;
        let mut depth = 0;

        loop {
            let failure = match self.execute_batch(&batch).await {
                Ok(count) => {
                    completed += count;
                    self.reporter.info(&messages::steps_completed(completed));
                    return Ok(QueryOutcome::Completed { steps: completed });
                }
                Err(failure) => failure,
            };
            completed += failure.index;

            if depth >= MAX_FIX_DEPTH {
                tracing::error!("Fix depth {} reached, giving up", depth);
                return Err(AssistantError::FixDepthExceeded { depth });
            }
            depth += 1;
            self.reporter.info(&messages::fix_attempt(depth, MAX_FIX_DEPTH));

            let failed = &batch[failure.index];
            let remaining = batch[failure.index + 1..].to_vec();
            let fixes = self
                .request_fix(request, failed, &failure.message, &remaining)
                .await?;

            if fixes.is_empty() {
                self.reporter.warn(messages::NO_FIX_PROPOSED);
                return Err(AssistantError::Execution {
                    step: completed + 1,
                    message: failure.message,
                });
            }

            self.show(&fixes);
            if !self.confirm(messages::CONFIRM_FIXES).await {
                self.reporter.info(messages::DECLINED);
                return Ok(QueryOutcome::Declined);
            }
            batch = fixes.into_iter().chain(remaining).collect();
        }
    }

    /// Runs steps in order, stopping at the first failure. Returns how many ran.
    async fn execute_batch(&self, batch: &[Command]) -> Result<usize, BatchFailure> {
        let mut executor = self.executor.lock().await;
        for (index, step) in batch.iter().enumerate() {
            tracing::info!("Executing step {}: {}", index + 1, step.describe());
            match executor.execute(step).await {
                Ok(output) => self.reporter.step_output(index + 1, &output),
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!("Step {} failed: {}", index + 1, message);
                    self.reporter.warn(&messages::step_failed(index + 1, &message));
                    return Err(BatchFailure { index, message });
                }
            }
        }
        Ok(batch.len())
    }

    /// Asks the model for commands that repair `failed`. Returns only executable steps.
    async fn request_fix(
        &self,
        request: &str,
        failed: &Command,
        error: &str,
        remaining: &[Command],
    ) -> Result<Vec<Command>, AssistantError> {
        let (root, cwd) = self.locations().await;
        let query = format!("{}\n{}", failed.describe(), error);
        let ctx = self.gather(&query, &root).await;
        let prompt = prompts::fix_prompt(
            request,
            failed,
            error,
            remaining,
            &ctx.metadata,
            &ctx.files,
            &cwd,
        );

        let commands = self.stream_commands(&prompt).await?;
        Ok(Plan::from_commands(commands).steps)
    }
}

#[async_trait]
impl QueryRunner for QueryEngine {
    async fn handle_query(&self, query: &str) -> Result<()> {
        self.run_query(query).await?;
        Ok(())
    }

    async fn handle_image(&self, path: &Path, instructions: &str) -> Result<()> {
        self.run_image_query(path, instructions).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{NoFiles, RecordingReporter, ScriptedLlm, ScriptedPrompter};
    use crate::domain::config::CommandsConfig;
    use crate::infrastructure::metadata::MetadataStore;
    use crate::infrastructure::tools::executor::CommandExecutor;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        llm: Arc<ScriptedLlm>,
        prompter: Arc<ScriptedPrompter>,
        reporter: Arc<RecordingReporter>,
    }

    impl Fixture {
        fn new(replies: &[&str], answers: &[bool]) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                llm: Arc::new(ScriptedLlm::new(replies)),
                prompter: Arc::new(ScriptedPrompter::new(answers)),
                reporter: Arc::new(RecordingReporter::default()),
            }
        }

        fn engine(&self) -> QueryEngine {
            let executor =
                CommandExecutor::new(self.dir.path(), &CommandsConfig::default()).unwrap();
            QueryEngine::new(
                self.llm.clone(),
                Arc::new(NoFiles),
                Arc::new(tokio::sync::Mutex::new(executor)),
                MetadataStore::open(self.dir.path().join("m.json"))
                    .unwrap()
                    .shared(),
                self.prompter.clone(),
                self.reporter.clone(),
            )
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }
    }

    fn shell(command: &str) -> String {
        format!("<step><type>shell</type><command>{command}</command></step>")
    }

    #[tokio::test]
    async fn test_runs_steps_in_order() {
        let reply = format!(
            "<explanation>Create then append.</explanation>{}{}",
            "<step><type>file</type><operation>CREATE</operation><filename>log.txt</filename>\
             <content><![CDATA[one\n]]></content></step>",
            shell("echo two >> log.txt")
        );
        let fx = Fixture::new(&[&reply], &[true]);

        let outcome = fx.engine().run_query("make a log").await.unwrap();

        assert_eq!(outcome, QueryOutcome::Completed { steps: 2 });
        assert_eq!(fs::read_to_string(fx.path("log.txt")).unwrap(), "one\ntwo\n");
        assert!(fx.reporter.contains("explanation: Create then append."));
        assert!(fx.llm.prompt(0).contains("make a log"));
    }

    #[tokio::test]
    async fn test_declined_runs_nothing() {
        let fx = Fixture::new(&[&shell("touch x.txt")], &[false]);
        let outcome = fx.engine().run_query("touch").await.unwrap();
        assert_eq!(outcome, QueryOutcome::Declined);
        assert!(!fx.path("x.txt").exists());
    }

    #[tokio::test]
    async fn test_auto_confirm_skips_prompt() {
        let fx = Fixture::new(&[&shell("touch x.txt")], &[]);
        let outcome = fx.engine().auto_confirm(true).run_query("touch").await.unwrap();
        assert_eq!(outcome, QueryOutcome::Completed { steps: 1 });
        assert_eq!(fx.prompter.asked(), 0);
        assert!(fx.path("x.txt").exists());
    }

    #[tokio::test]
    async fn test_fix_commands_then_remaining_steps() {
        // `cat need.txt` fails until the fix creates it; the remaining step runs after.
        let first = format!("{}{}", shell("cat need.txt"), shell("touch done.txt"));
        let fix = "<step><type>file</type><operation>CREATE</operation><filename>need.txt</filename>\
                   <content>x</content></step>";
        let fx = Fixture::new(&[&first, fix], &[]);

        let outcome = fx.engine().auto_confirm(true).run_query("q").await.unwrap();

        assert_eq!(outcome, QueryOutcome::Completed { steps: 2 });
        assert!(fx.path("done.txt").exists());
        let fix_prompt = fx.llm.prompt(1);
        assert!(fix_prompt.contains("$ cat need.txt"));
        assert!(fix_prompt.contains("1. $ touch done.txt"));
    }

    #[tokio::test]
    async fn test_fix_depth_is_capped() {
        let failing = shell("exit 1");
        let replies: Vec<&str> = std::iter::repeat_n(failing.as_str(), MAX_FIX_DEPTH + 1).collect();
        let fx = Fixture::new(&replies, &[]);

        let err = fx.engine().auto_confirm(true).run_query("q").await.unwrap_err();

        assert!(matches!(err, AssistantError::FixDepthExceeded { depth: MAX_FIX_DEPTH }));
        assert_eq!(fx.llm.calls(), MAX_FIX_DEPTH + 1);
    }

    #[tokio::test]
    async fn test_prose_reply_is_parse_error() {
        let fx = Fixture::new(&["You could try reinstalling."], &[]);
        let err = fx.engine().run_query("q").await.unwrap_err();
        assert!(matches!(err, AssistantError::Parse(_)));
    }

    #[tokio::test]
    async fn test_api_failure_is_reported() {
        let fx = Fixture::new(&[], &[]);
        let err = fx.engine().run_query("q").await.unwrap_err();
        assert!(matches!(err, AssistantError::Api(_)));
    }

    #[tokio::test]
    async fn test_ask_streams_and_executes_nothing() {
        let fx = Fixture::new(&[&format!("It runs {}", shell("touch x.txt"))], &[]);
        let answer = fx.engine().ask("what does it do?").await.unwrap();
        assert!(answer.starts_with("It runs"));
        assert!(!fx.path("x.txt").exists());
        assert!(fx.reporter.contains("chunk: "));
        assert_eq!(fx.prompter.asked(), 0);
    }

    #[tokio::test]
    async fn test_image_query_uses_vision() {
        let fx = Fixture::new(&[&shell("touch from_image.txt")], &[true]);
        let image = fx.path("mock.png");
        fs::write(&image, b"png").unwrap();

        let outcome = fx
            .engine()
            .run_image_query(&image, "build this page")
            .await
            .unwrap();

        assert_eq!(outcome, QueryOutcome::Completed { steps: 1 });
        assert_eq!(*fx.llm.images.lock().unwrap(), vec![image]);
        assert!(fx.llm.prompt(0).contains("build this page"));
    }
}
