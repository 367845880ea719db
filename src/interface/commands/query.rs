//! # Query Command
//!
//! Turns a request into steps, confirms them and runs them, repairing failures.

use anyhow::Result;
use std::sync::Arc;

use crate::application::engine::QueryOutcome;
use crate::interface::Services;
use crate::interface::console::{StdinPrompter, TerminalReporter};

pub async fn handle_query(services: &Services, request: &str, yes: bool) -> Result<QueryOutcome> {
    tracing::info!("Query: {}", request);
    let engine = super::engine(
        services,
        Arc::new(StdinPrompter),
        Arc::new(TerminalReporter),
    )
    .auto_confirm(yes);

    let outcome = engine.run_query(request).await;
    // File steps may have queued index updates.
    services.updater.settle().await;
    let outcome = outcome?;
    tracing::info!("Query finished: {:?}", outcome);
    Ok(outcome)
}
