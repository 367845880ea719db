//! Fakes for the seam traits, shared by the application tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::traits::{FileRelevanceFinder, LlmProvider, Prompter, Reporter};
use crate::domain::types::Command;
use crate::infrastructure::llm::Error;

/// Replies with canned responses in order and records every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub images: Mutex<Vec<PathBuf>>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn next(&self, prompt: &str) -> Result<String, Error> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::new("scripted", "no more replies"))
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn call(&self, prompt: &str) -> Result<String, Error> {
        self.next(prompt)
    }

    async fn stream(
        &self,
        prompt: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, Error> {
        let reply = self.next(prompt)?;
        // Small uneven chunks, like a real stream.
        let mut rest = reply.as_str();
        let mut size = 3;
        while !rest.is_empty() {
            let mut end = size.min(rest.len());
            while !rest.is_char_boundary(end) {
                end += 1;
            }
            on_chunk(&rest[..end]);
            rest = &rest[end..];
            size = size % 7 + 2;
        }
        Ok(reply)
    }

    async fn call_vision(&self, prompt: &str, image_path: &Path) -> Result<String, Error> {
        self.images.lock().unwrap().push(image_path.to_path_buf());
        self.next(prompt)
    }
}

/// Answers confirmations from a fixed list, declining once it runs out.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    pub questions: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn asked(&self) -> usize {
        self.questions.lock().unwrap().len()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm(&self, question: &str) -> bool {
        self.questions.lock().unwrap().push(question.to_string());
        self.answers.lock().unwrap().pop_front().unwrap_or(false)
    }
}

#[derive(Default)]
pub struct NoFiles;

#[async_trait]
impl FileRelevanceFinder for NoFiles {
    async fn find_relevant_files(&self, _: &str, _: &str) -> anyhow::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

impl Reporter for RecordingReporter {
    fn text_chunk(&self, chunk: &str) {
        self.lines.lock().unwrap().push(format!("chunk: {chunk}"));
    }
    fn explanation(&self, text: &str) {
        self.lines.lock().unwrap().push(format!("explanation: {text}"));
    }
    fn step(&self, number: usize, command: &Command) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("step {number}: {}", command.describe()));
    }
    fn step_output(&self, number: usize, output: &str) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("output {number}: {output}"));
    }
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("info: {message}"));
    }
    fn warn(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("warn: {message}"));
    }
}
