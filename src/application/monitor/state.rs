//! Shared monitor state: the flags both loops read and write, the handle given to the
//! resolution loop, and the events reported to the terminal.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::types::ErrorKind;

/// Lifecycle of the supervised process, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Running,
    ErrorDetected,
    Idle,
    UserInputPending,
    Restarting,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Starting => "starting",
            MonitorState::Running => "running",
            MonitorState::ErrorDetected => "error-detected",
            MonitorState::Idle => "idle",
            MonitorState::UserInputPending => "user-input-pending",
            MonitorState::Restarting => "restarting",
            MonitorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Cross-loop flags. Everything else is owned by the output loop.
#[derive(Debug, Default)]
pub struct MonitorFlags {
    should_stop: AtomicBool,
    restart_requested: AtomicBool,
    processing_input: AtomicBool,
}

impl MonitorFlags {
    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    pub fn request_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_requested.load(Ordering::SeqCst)
    }

    /// Clears and returns the restart request.
    pub fn take_restart_request(&self) -> bool {
        self.restart_requested.swap(false, Ordering::SeqCst)
    }

    pub fn processing_input(&self) -> bool {
        self.processing_input.load(Ordering::SeqCst)
    }

    pub fn set_processing_input(&self, value: bool) {
        self.processing_input.store(value, Ordering::SeqCst);
    }
}

/// What the resolution loop and the CLI may do to a running monitor.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    flags: Arc<MonitorFlags>,
}

impl MonitorHandle {
    pub(crate) fn new(flags: Arc<MonitorFlags>) -> Self {
        Self { flags }
    }

    /// Asks the output loop to restart the server at its next iteration.
    pub fn request_restart(&self) {
        tracing::info!("Restart requested");
        self.flags.request_restart();
    }

    pub fn restart_pending(&self) -> bool {
        self.flags.restart_requested()
    }

    pub fn stop(&self) {
        self.flags.stop();
    }

    pub fn is_stopping(&self) -> bool {
        self.flags.should_stop()
    }

    /// Holds error dispatch, restarts and the idle prompt while the user is mid-request.
    pub fn set_processing_input(&self, value: bool) {
        self.flags.set_processing_input(value);
    }

    pub fn processing_input(&self) -> bool {
        self.flags.processing_input()
    }
}

/// How `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    UserExit,
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Started { command: String },
    Output(String),
    ErrorDetected { kind: ErrorKind, line: String },
    ResolutionFinished(String),
    ResolutionFailed(String),
    UnexpectedExit { status: String, attempt: u32, max: u32 },
    Restarting,
    Restarted,
    RestartFailed { attempt: u32, max: u32, message: String },
    IdlePrompt,
    InvalidImagePath(PathBuf),
    InputFailed(String),
    Fatal(String),
    Stopped,
}

/// Receives monitor events. The terminal implementation prints them.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: MonitorEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_request_is_taken_once() {
        let flags = Arc::new(MonitorFlags::default());
        let handle = MonitorHandle::new(flags.clone());
        assert!(!flags.take_restart_request());
        handle.request_restart();
        assert!(flags.take_restart_request());
        assert!(!flags.take_restart_request());
    }

    #[test]
    fn test_stop_via_handle() {
        let flags = Arc::new(MonitorFlags::default());
        let handle = MonitorHandle::new(flags.clone());
        assert!(!handle.is_stopping());
        handle.stop();
        assert!(flags.should_stop());
    }
}
