//! # Monitor Command
//!
//! Runs the dev server under supervision. Error lines go to the resolution loop and
//! lines typed at the terminal go to the query engine.

use anyhow::{Result, anyhow};
use std::sync::Arc;

use crate::application::monitor::{DevServerMonitor, MonitorExit};
use crate::application::resolution::ResolutionLoop;
use crate::domain::error::AssistantError;
use crate::domain::traits::{Prompter, Reporter};
use crate::interface::Services;
use crate::interface::console::{
    ConfirmSlot, MonitorPrompter, TerminalNotifier, TerminalReporter, spawn_input_reader,
};
use crate::strings::messages;

/// The command line to supervise: the arguments if given, else the one recorded in
/// the metadata.
pub async fn dev_server_command(services: &Services, args: &[String]) -> Result<String> {
    if !args.is_empty() {
        return Ok(args.join(" "));
    }
    let store = services.metadata.lock().await;
    store
        .dev_server_command()
        .map(str::to_string)
        .ok_or_else(|| anyhow!(messages::NO_DEV_SERVER))
}

pub async fn handle_monitor(services: &Services, args: &[String]) -> Result<()> {
    let command = dev_server_command(services, args).await?;
    tracing::info!("Monitoring `{}` in {}", command, services.root.display());

    let slot = ConfirmSlot::default();
    let prompter: Arc<dyn Prompter> = Arc::new(MonitorPrompter::new(slot.clone()));
    let reporter: Arc<dyn Reporter> = Arc::new(TerminalReporter);

    let resolver = Arc::new(ResolutionLoop::new(
        services.llm.clone(),
        services.finder.clone(),
        services.executor.clone(),
        services.metadata.clone(),
        prompter.clone(),
        reporter.clone(),
        services.config.metadata.max_file_bytes,
    ));
    let runner = Arc::new(super::engine(services, prompter, reporter));

    let monitor = DevServerMonitor::new(
        command,
        services.root.clone(),
        &services.config.monitor,
        resolver,
        runner,
        Arc::new(TerminalNotifier),
    )?;

    let exit = monitor.run(spawn_input_reader(slot, monitor.handle())).await?;
    services.updater.settle().await;
    match exit {
        MonitorExit::UserExit => Ok(()),
        MonitorExit::Fatal => Err(AssistantError::FatalSupervision {
            attempts: services.config.monitor.max_retries,
        }
        .into()),
    }
}
