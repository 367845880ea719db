//! # Console
//!
//! Everything that touches the terminal: styled output, yes/no prompts, and the
//! line-reader thread used while the monitor is running.

use crossterm::style::Stylize;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use async_trait::async_trait;

use crate::application::monitor::{MonitorEvent, MonitorHandle, Notifier, UserInput};
use crate::domain::traits::{Prompter, Reporter, is_affirmative};
use crate::domain::types::Command;
use crate::strings::messages;

const MAX_OUTPUT_LINES: usize = 20;

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

/// Prints engine progress to the terminal.
#[derive(Debug, Default, Clone)]
pub struct TerminalReporter;

impl Reporter for TerminalReporter {
    fn text_chunk(&self, chunk: &str) {
        print!("{chunk}");
        flush_stdout();
    }

    fn explanation(&self, text: &str) {
        println!("\n{}", text.cyan());
    }

    fn step(&self, number: usize, command: &Command) {
        println!("  {} {}", format!("{number}.").dark_grey(), command.describe().bold());
        if let Command::File {
            content: Some(content),
            ..
        } = command
        {
            let lines = content.lines().count();
            println!("     {}", format!("({lines} lines)").dark_grey());
        }
    }

    fn step_output(&self, number: usize, output: &str) {
        if output.trim().is_empty() {
            println!("  {} {}", format!("{number}.").dark_grey(), "ok".green());
            return;
        }
        let lines: Vec<&str> = output.lines().collect();
        let shown = &lines[lines.len().saturating_sub(MAX_OUTPUT_LINES)..];
        println!("  {} {}", format!("{number}.").dark_grey(), "ok".green());
        if shown.len() < lines.len() {
            println!("     {}", format!("... {} lines hidden", lines.len() - shown.len()).dark_grey());
        }
        for line in shown {
            println!("     {}", line.dark_grey());
        }
    }

    fn info(&self, message: &str) {
        println!("{}", message.green());
    }

    fn warn(&self, message: &str) {
        eprintln!("{}", message.yellow());
    }
}

/// Prints monitor events.
#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::Started { command } => {
                println!("{}", messages::monitor_started(&command).green())
            }
            MonitorEvent::Output(line) => println!("{line}"),
            MonitorEvent::ErrorDetected { kind, line } => {
                println!("{}", messages::error_detected(&kind.to_string(), &line).red().bold())
            }
            MonitorEvent::ResolutionFinished(summary) => println!("{}", summary.green()),
            MonitorEvent::ResolutionFailed(err) | MonitorEvent::InputFailed(err) => {
                eprintln!("{}", err.red())
            }
            MonitorEvent::UnexpectedExit {
                status,
                attempt,
                max,
            } => eprintln!("{}", messages::unexpected_exit(&status, attempt, max).yellow()),
            MonitorEvent::Restarting => println!("{}", "Restarting dev server...".yellow()),
            MonitorEvent::Restarted => println!("{}", "Dev server restarted.".green()),
            MonitorEvent::RestartFailed {
                attempt,
                max,
                message,
            } => eprintln!("{}", messages::restart_failed(attempt, max, &message).red()),
            MonitorEvent::IdlePrompt => println!("{}", messages::IDLE_PROMPT.dark_grey()),
            MonitorEvent::InvalidImagePath(path) => eprintln!(
                "{}",
                messages::image_not_found(&path.display().to_string()).yellow()
            ),
            MonitorEvent::Fatal(reason) => eprintln!("{}", reason.red().bold()),
            MonitorEvent::Stopped => println!("{}", "Dev server stopped.".dark_grey()),
        }
    }
}

/// Reads confirmations straight from stdin. Used outside the monitor.
#[derive(Debug, Default)]
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn confirm(&self, question: &str) -> bool {
        print!("{} {} ", question.bold(), "[y/N]".dark_grey());
        flush_stdout();
        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => is_affirmative(&line),
            _ => false,
        }
    }
}

/// Hands the next typed line to whoever is waiting for a confirmation.
#[derive(Debug, Clone, Default)]
pub struct ConfirmSlot {
    pending: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl ConfirmSlot {
    /// Routes `line` to a pending confirmation. Returns the line back if nobody is waiting.
    pub fn offer(&self, line: String) -> Option<String> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending.take() {
            Some(tx) => match tx.send(line) {
                Ok(()) => None,
                Err(line) => Some(line),
            },
            None => Some(line),
        }
    }

    /// Waits for the next line typed at the terminal.
    pub async fn next_answer(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx.await.ok()
    }
}

/// Confirmations while the monitor owns the terminal: the reader thread forwards the
/// answer through the [`ConfirmSlot`].
pub struct MonitorPrompter {
    slot: ConfirmSlot,
}

impl MonitorPrompter {
    pub fn new(slot: ConfirmSlot) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl Prompter for MonitorPrompter {
    async fn confirm(&self, question: &str) -> bool {
        println!("{} {}", question.bold(), "[y/N]".dark_grey());
        match self.slot.next_answer().await {
            Some(answer) => is_affirmative(&answer),
            None => false,
        }
    }
}

/// Filename completion for the image path prompt.
struct PathHelper {
    files: FilenameCompleter,
}

impl Completer for PathHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        self.files.complete(line, pos, ctx)
    }
}

impl Hinter for PathHelper {
    type Hint = String;
}
impl Highlighter for PathHelper {}
impl Validator for PathHelper {}
impl Helper for PathHelper {}

/// Starts the terminal reader on its own thread.
pub fn spawn_input_reader(slot: ConfirmSlot, monitor: MonitorHandle) -> mpsc::Receiver<UserInput> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        if let Err(e) = read_loop(&tx, &slot, &monitor) {
            tracing::error!("Terminal input failed: {}", e);
            let _ = tx.blocking_send(UserInput::Exit);
        }
    });
    rx
}

fn read_loop(
    tx: &mpsc::Sender<UserInput>,
    slot: &ConfirmSlot,
    monitor: &MonitorHandle,
) -> rustyline::Result<()> {
    let mut editor: Editor<PathHelper, DefaultHistory> = Editor::new()?;
    editor.set_helper(Some(PathHelper {
        files: FilenameCompleter::new(),
    }));

    loop {
        let line = match editor.readline(messages::INPUT_PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                let _ = tx.blocking_send(UserInput::Exit);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some(line) = slot.offer(line) else {
            continue;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(trimmed);

        let input = if trimmed.eq_ignore_ascii_case("exit") {
            UserInput::Exit
        } else if trimmed.eq_ignore_ascii_case("p") {
            let request = read_image_request(monitor, |prompt| loop {
                let line = editor.readline(prompt)?;
                if let Some(line) = slot.offer(line) {
                    return Ok(line);
                }
            })?;
            match request {
                Some(input) => input,
                None => continue,
            }
        } else {
            UserInput::Query(trimmed.to_string())
        };

        let exit = input == UserInput::Exit;
        if tx.blocking_send(input).is_err() || exit {
            return Ok(());
        }
    }
}

/// Image sub-mode. Input is marked busy before the first prompt so the monitor holds
/// error dispatch and restarts; the input loop clears the mark once the request is
/// handled. Ctrl-C cancels the request and clears the mark here.
fn read_image_request(
    monitor: &MonitorHandle,
    mut read: impl FnMut(&str) -> rustyline::Result<String>,
) -> rustyline::Result<Option<UserInput>> {
    monitor.set_processing_input(true);
    let answers = read(messages::IMAGE_PATH_PROMPT)
        .and_then(|path| Ok((path, read(messages::IMAGE_INSTRUCTIONS_PROMPT)?)));
    match answers {
        Ok((path, instructions)) => Ok(Some(UserInput::Image {
            path: expand_home(path.trim()),
            instructions: instructions.trim().to_string(),
        })),
        Err(ReadlineError::Interrupted) => {
            monitor.set_processing_input(false);
            Ok(None)
        }
        Err(e) => {
            monitor.set_processing_input(false);
            Err(e)
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
