//! # Messages
//!
//! Constant strings and format functions for user-facing terminal output.

pub const CONFIRM_STEPS: &str = "Run these steps?";
pub const CONFIRM_FIXES: &str = "Apply these fixes?";
pub const CONFIRM_RESTART: &str = "Restart the dev server now?";
pub const DECLINED: &str = "Nothing was changed.";
pub const NOTHING_TO_DO: &str = "The model proposed no steps.";
pub const NO_FIX_PROPOSED: &str = "The model proposed no fix.";
pub const IDLE_PROMPT: &str =
    "Server is quiet. Type a request, `p` to attach an image, or `exit` to stop.";
pub const IMAGE_PATH_PROMPT: &str = "Image path: ";
pub const IMAGE_INSTRUCTIONS_PROMPT: &str = "Instructions: ";
pub const INPUT_PROMPT: &str = "> ";
pub const NO_DEV_SERVER: &str =
    "No dev server command given and none recorded in the metadata. Run `devpilot monitor <command>` or `devpilot metadata rebuild`.";

pub fn steps_completed(count: usize) -> String {
    format!("Done: {count} step(s) completed.")
}

pub fn step_failed(step: usize, err: &str) -> String {
    format!("Step {step} failed: {err}")
}

pub fn fix_attempt(depth: usize, max: usize) -> String {
    format!("Asking the model for a fix (attempt {depth}/{max})...")
}

pub fn unparsed_output(rest: &str) -> String {
    format!("Ignoring unparsed model output:\n{rest}")
}

pub fn monitor_started(command: &str) -> String {
    format!("Started `{command}`. Watching for errors.")
}

pub fn error_detected(kind: &str, line: &str) -> String {
    format!("{kind} detected: {line}")
}

pub fn unexpected_exit(status: &str, attempt: u32, max: u32) -> String {
    format!("Dev server stopped ({status}). Restarting ({attempt}/{max})...")
}

pub fn restart_failed(attempt: u32, max: u32, err: &str) -> String {
    format!("Restart {attempt}/{max} failed: {err}")
}

pub fn image_not_found(path: &str) -> String {
    format!("No such image: {path}")
}

pub fn metadata_rebuilt(files: usize, path: &str) -> String {
    format!("Indexed {files} file(s) into {path}")
}

pub fn metadata_updated(files: usize) -> String {
    format!("Updated metadata for {files} file(s)")
}
