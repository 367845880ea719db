//! # Dev Server Monitor
//!
//! Runs the project's dev server, echoes its output, and watches it for errors.
//!
//! Two loops share a [`MonitorFlags`]:
//!
//! * the **output loop** owns the child process, the retry counter, the recent-lines
//!   buffer and the idle timer. It restarts the server when it dies (up to
//!   `max_retries` times), dispatches matching lines to the [`ErrorResolution`] loop
//!   and prints an idle prompt once per quiet period.
//! * the **input loop** receives [`UserInput`] from the terminal reader and forwards it
//!   to the [`QueryRunner`], marking `processing_input` while it does.

mod patterns;
mod process;
mod state;

pub use patterns::PatternTable;
pub use state::{MonitorEvent, MonitorExit, MonitorFlags, MonitorHandle, MonitorState, Notifier};

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::application::resolution::ResolutionOutcome;
use crate::domain::config::MonitorConfig;
use crate::domain::types::DetectedError;
use process::{ServerProcess, describe_status};

/// A line of user input, already classified by the terminal reader.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    Query(String),
    Image { path: PathBuf, instructions: String },
    Exit,
}

/// Handles requests typed while the monitor is running.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn handle_query(&self, query: &str) -> Result<()>;
    async fn handle_image(&self, path: &Path, instructions: &str) -> Result<()>;
}

/// Turns a detected server error into applied fixes.
#[async_trait]
pub trait ErrorResolution: Send + Sync {
    async fn resolve(
        &self,
        error: &DetectedError,
        monitor: &MonitorHandle,
    ) -> Result<ResolutionOutcome>;
}

/// State owned by the output loop.
struct OutputState {
    state: MonitorState,
    retry_count: u32,
    recent: VecDeque<String>,
    last_output: Instant,
    idle_prompted: bool,
    /// A failed automatic restart is being retried.
    respawn_pending: bool,
}

impl OutputState {
    fn new(capacity: usize) -> Self {
        Self {
            state: MonitorState::Starting,
            retry_count: 0,
            recent: VecDeque::with_capacity(capacity),
            last_output: Instant::now(),
            idle_prompted: false,
            respawn_pending: false,
        }
    }

    fn set(&mut self, state: MonitorState) {
        if self.state != state {
            tracing::debug!("Monitor {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn output_seen(&mut self) {
        self.last_output = Instant::now();
        self.idle_prompted = false;
    }
}

pub struct DevServerMonitor {
    command: String,
    cwd: PathBuf,
    config: MonitorConfig,
    patterns: PatternTable,
    flags: Arc<MonitorFlags>,
    resolver: Arc<dyn ErrorResolution>,
    runner: Arc<dyn QueryRunner>,
    notifier: Arc<dyn Notifier>,
}

impl DevServerMonitor {
    pub fn new(
        command: impl Into<String>,
        cwd: impl Into<PathBuf>,
        config: &MonitorConfig,
        resolver: Arc<dyn ErrorResolution>,
        runner: Arc<dyn QueryRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        Ok(Self {
            command: command.into(),
            cwd: cwd.into(),
            config: config.clone(),
            patterns: PatternTable::with_extra(&config.patterns)?,
            flags: Arc::new(MonitorFlags::default()),
            resolver,
            runner,
            notifier,
        })
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle::new(self.flags.clone())
    }

    /// Supervises the server until the user exits or restarts are exhausted.
    pub async fn run(&self, input: mpsc::Receiver<UserInput>) -> Result<MonitorExit> {
        let mut input_task = tokio::spawn(input_loop(
            input,
            self.flags.clone(),
            self.runner.clone(),
            self.notifier.clone(),
        ));

        let result = self.output_loop().await;

        self.flags.stop();
        if tokio::time::timeout(Duration::from_millis(500), &mut input_task)
            .await
            .is_err()
        {
            tracing::debug!("Input loop busy at shutdown, aborting it");
            input_task.abort();
        }
        result
    }

    fn poll(&self) -> Duration {
        Duration::from_millis(self.config.poll_ms.max(1))
    }

    fn idle_after(&self) -> Duration {
        Duration::from_secs_f64(self.config.idle_secs.max(0.0))
    }

    fn spawn(&self) -> Result<ServerProcess> {
        ServerProcess::spawn(&self.command, &self.cwd)
            .with_context(|| format!("Failed to start `{}`", self.command))
    }

    async fn output_loop(&self) -> Result<MonitorExit> {
        let handle = self.handle();
        let max = self.config.max_retries;
        let mut st = OutputState::new(self.config.error_buffer);

        let mut server = Some(self.spawn()?);
        self.notifier.notify(MonitorEvent::Started {
            command: self.command.clone(),
        });
        st.set(MonitorState::Running);

        loop {
            if self.flags.should_stop() {
                if let Some(s) = server.as_mut() {
                    s.terminate().await;
                }
                st.set(MonitorState::Stopped);
                self.notifier.notify(MonitorEvent::Stopped);
                return Ok(MonitorExit::UserExit);
            }

            // Restarts and exits wait while a user request is being handled.
            let busy = self.flags.processing_input();

            if !busy && self.flags.take_restart_request() {
                let explicit = !std::mem::take(&mut st.respawn_pending);
                if let Some(exit) = self.respawn(&mut server, &mut st, explicit).await {
                    return Ok(exit);
                }
                continue;
            }

            let Some(running) = server.as_mut() else {
                tokio::time::sleep(self.poll()).await;
                continue;
            };

            if let Some(line) = running.next_line(self.poll()).await {
                self.handle_line(line, &mut st, &handle).await;
                continue;
            }

            // Nothing to read: see whether the process is still alive.
            if !self.flags.processing_input() && let Some(status) = exit_of(running) {
                for line in running.drain(self.poll()).await {
                    self.handle_line(line, &mut st, &handle).await;
                }
                tracing::warn!("Dev server exited ({})", status);

                if st.retry_count >= max {
                    return Ok(self.fatal(
                        &mut st,
                        format!("server exited {} times in a row ({})", max + 1, status),
                    ));
                }
                st.retry_count += 1;
                self.notifier.notify(MonitorEvent::UnexpectedExit {
                    status,
                    attempt: st.retry_count,
                    max,
                });
                if let Some(exit) = self.respawn(&mut server, &mut st, false).await {
                    return Ok(exit);
                }
                continue;
            }

            if !st.idle_prompted
                && !self.flags.processing_input()
                && st.last_output.elapsed() > self.idle_after()
            {
                st.idle_prompted = true;
                st.set(MonitorState::Idle);
                self.notifier.notify(MonitorEvent::IdlePrompt);
            } else if self.flags.processing_input() {
                st.set(MonitorState::UserInputPending);
            }
        }
    }

    /// Replaces the server process. A failed spawn counts as an attempt, is retried
    /// through a restart request and becomes fatal once `max_retries` is reached.
    async fn respawn(
        &self,
        server: &mut Option<ServerProcess>,
        st: &mut OutputState,
        explicit: bool,
    ) -> Option<MonitorExit> {
        let max = self.config.max_retries;
        st.set(MonitorState::Restarting);
        self.notifier.notify(MonitorEvent::Restarting);
        if let Some(mut old) = server.take() {
            old.terminate().await;
        }

        match self.spawn() {
            Ok(fresh) => {
                *server = Some(fresh);
                if explicit {
                    st.retry_count = 0;
                } else {
                    // An automatic restart also satisfies any pending request.
                    self.flags.take_restart_request();
                }
                st.output_seen();
                st.set(MonitorState::Running);
                self.notifier.notify(MonitorEvent::Restarted);
                None
            }
            Err(e) => {
                st.retry_count += 1;
                tracing::error!("Restart failed: {:#}", e);
                if st.retry_count >= max {
                    return Some(self.fatal(st, format!("restart failed: {e:#}")));
                }
                self.notifier.notify(MonitorEvent::RestartFailed {
                    attempt: st.retry_count,
                    max,
                    message: format!("{e:#}"),
                });
                st.respawn_pending = !explicit;
                self.flags.request_restart();
                None
            }
        }
    }

    async fn handle_line(&self, line: String, st: &mut OutputState, handle: &MonitorHandle) {
        st.retry_count = 0;
        st.output_seen();
        st.set(MonitorState::Running);
        self.notifier.notify(MonitorEvent::Output(line.clone()));

        if st.recent.len() >= self.config.error_buffer.max(1) {
            st.recent.pop_front();
        }
        st.recent.push_back(line.clone());

        if self.flags.processing_input() {
            return;
        }
        let Some(kind) = self.patterns.detect(&line) else {
            return;
        };

        st.set(MonitorState::ErrorDetected);
        tracing::info!("Detected {}: {}", kind, line);
        self.notifier.notify(MonitorEvent::ErrorDetected {
            kind,
            line: line.clone(),
        });

        let error = DetectedError {
            kind,
            message: line.trim().to_string(),
            context: st.recent.iter().cloned().collect(),
        };
        match self.resolver.resolve(&error, handle).await {
            Ok(outcome) => self
                .notifier
                .notify(MonitorEvent::ResolutionFinished(outcome.to_string())),
            Err(e) => {
                tracing::error!("Resolution failed: {:#}", e);
                self.notifier
                    .notify(MonitorEvent::ResolutionFailed(format!("{e:#}")));
            }
        }
        st.recent.clear();
        // Time spent resolving does not count as idle.
        st.output_seen();
        st.set(MonitorState::Running);
    }

    fn fatal(&self, st: &mut OutputState, reason: String) -> MonitorExit {
        tracing::error!("Monitor giving up: {}", reason);
        st.set(MonitorState::Stopped);
        self.flags.stop();
        self.notifier.notify(MonitorEvent::Fatal(reason));
        MonitorExit::Fatal
    }
}

fn exit_of(running: &mut ServerProcess) -> Option<String> {
    match running.exit_status() {
        Ok(Some(status)) => Some(describe_status(&status)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Failed to poll the dev server: {}", e);
            Some(format!("unknown status ({e})"))
        }
    }
}

async fn input_loop(
    mut input: mpsc::Receiver<UserInput>,
    flags: Arc<MonitorFlags>,
    runner: Arc<dyn QueryRunner>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        if flags.should_stop() {
            break;
        }
        let message = match tokio::time::timeout(Duration::from_millis(100), input.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!("Input closed, stopping monitor");
                flags.stop();
                break;
            }
            Err(_) => continue,
        };

        match message {
            UserInput::Exit => {
                flags.stop();
                break;
            }
            UserInput::Query(query) => {
                let query = query.trim();
                if query.is_empty() {
                    continue;
                }
                if query.eq_ignore_ascii_case("exit") {
                    flags.stop();
                    break;
                }
                flags.set_processing_input(true);
                if let Err(e) = runner.handle_query(query).await {
                    tracing::error!("Query failed: {:#}", e);
                    notifier.notify(MonitorEvent::InputFailed(format!("{e:#}")));
                }
                flags.set_processing_input(false);
            }
            UserInput::Image { path, instructions } => {
                // The reader already marked input as busy while it prompted for these.
                flags.set_processing_input(true);
                if !path.exists() {
                    notifier.notify(MonitorEvent::InvalidImagePath(path));
                } else if let Err(e) = runner.handle_image(&path, &instructions).await {
                    tracing::error!("Image query failed: {:#}", e);
                    notifier.notify(MonitorEvent::InputFailed(format!("{e:#}")));
                }
                flags.set_processing_input(false);
            }
        }
    }
}
