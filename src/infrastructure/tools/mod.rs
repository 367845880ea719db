//! # Tools Module
//!
//! In-process command execution: the shell/file executor and the sandbox that keeps
//! it inside the project root.

pub mod executor;
pub mod sandbox;
