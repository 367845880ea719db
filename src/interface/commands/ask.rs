//! # Ask Command
//!
//! Answers a question about the project without running anything.

use anyhow::Result;
use std::sync::Arc;

use crate::interface::Services;
use crate::interface::console::{StdinPrompter, TerminalReporter};

pub async fn handle_ask(services: &Services, question: &str) -> Result<()> {
    tracing::info!("Ask: {}", question);
    let engine = super::engine(
        services,
        Arc::new(StdinPrompter),
        Arc::new(TerminalReporter),
    );
    engine.ask(question).await?;
    println!();
    Ok(())
}
