//! # Infrastructure Layer
//!
//! Handles interactions with external systems: the model API, the shell and the
//! filesystem. Implements the traits defined in the Domain layer (e.g. `LlmProvider`).

pub mod llm;
pub mod metadata;
pub mod tools;
