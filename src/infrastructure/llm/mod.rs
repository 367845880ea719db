//! Simple LLM API wrapper for multiple providers
//!
//! This module provides a unified interface for the hosted model APIs the
//! assistant talks to (Anthropic Messages, OpenAI chat completions), with
//! plain, streaming and vision requests plus automatic continuation of
//! responses cut off by the token limit.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! let client = Client::new(config.llm.clone())?;
//! let text = client.call("Hello, world!").await?;
//! ```

mod client;
pub mod providers;
mod types;

pub use client::Client;

pub use types::{Context, Error, ImageData, Message, MessageRole, Provider, Response, TokenUsage};
