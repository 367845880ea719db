//! # Command Handlers
//!
//! One handler per CLI subcommand. Each builds the application services it needs from
//! [`Services`](crate::interface::Services) and reports to the terminal.

pub mod ask;
pub mod metadata;
pub mod monitor;
pub mod query;

use std::sync::Arc;

use crate::application::engine::QueryEngine;
use crate::domain::traits::{Prompter, Reporter};
use crate::interface::Services;

/// A query engine over the shared services.
pub(crate) fn engine(
    services: &Services,
    prompter: Arc<dyn Prompter>,
    reporter: Arc<dyn Reporter>,
) -> QueryEngine {
    QueryEngine::new(
        services.llm.clone(),
        services.finder.clone(),
        services.executor.clone(),
        services.metadata.clone(),
        prompter,
        reporter,
    )
    .max_file_bytes(services.config.metadata.max_file_bytes)
}
