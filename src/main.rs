//! # Main Entry Point
//!
//! Parses the command line, sets up logging and hands off to the command handlers:
//! - Domain: Configuration, Types and Errors
//! - Infrastructure: LLM client, Command Executor, Metadata Store
//! - Application: Stream Interpreter, Query Engine, Resolution Loop, Monitor
//! - Interface: Console and Command Handlers
//!

mod application;
mod domain;
mod infrastructure;
mod interface;
mod strings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::config::AppConfig;
use crate::domain::paths;
use crate::interface::Services;
use crate::interface::commands;

#[derive(Debug, Parser)]
#[command(name = "devpilot", version, about = "LLM-assisted development from the terminal")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Verbose logging, mirrored to stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Answer a question about the project
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Generate and run the steps for a request
    Query {
        /// Run without asking for confirmation
        #[arg(long, short)]
        yes: bool,
        #[arg(required = true, trailing_var_arg = true)]
        request: Vec<String>,
    },
    /// Supervise the dev server and resolve errors as they appear
    Monitor {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Maintain the project metadata index
    Metadata {
        #[command(subcommand)]
        action: MetadataAction,
    },
}

#[derive(Debug, Subcommand)]
enum MetadataAction {
    /// Re-index every source file
    Rebuild,
    /// Re-describe the given files, or every stale one
    Update { paths: Vec<PathBuf> },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = cli
        .project
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
        .canonicalize()
        .context("Failed to resolve the project directory")?;

    let _guard = init_logging(&root, cli.debug)?;
    tracing::info!("Starting devpilot in {}", root.display());

    let config = AppConfig::load(&root)?;
    let services = Services::new(&root, config)?;

    let result = dispatch(&services, cli.command).await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

async fn dispatch(services: &Services, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Ask { question } => commands::ask::handle_ask(services, &question.join(" ")).await,
        CliCommand::Query { yes, request } => {
            commands::query::handle_query(services, &request.join(" "), yes).await?;
            Ok(())
        }
        CliCommand::Monitor { command } => commands::monitor::handle_monitor(services, &command).await,
        CliCommand::Metadata { action } => {
            match action {
                MetadataAction::Rebuild => commands::metadata::handle_rebuild(services).await?,
                MetadataAction::Update { paths } => {
                    commands::metadata::handle_update(services, &paths).await?
                }
            };
            Ok(())
        }
    }
}

/// Session log under the project's data directory, plus stderr with `--debug`.
fn init_logging(root: &Path, debug: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let data_dir = paths::data_dir(root);
    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    }

    // Clear previous session log
    let log_path = data_dir.join(paths::SESSION_LOG);
    if log_path.exists() {
        let _ = fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(&data_dir, paths::SESSION_LOG);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if debug {
        "debug,hyper=warn,reqwest=warn"
    } else {
        "info,hyper=warn,reqwest=warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // Layer for file (Always active)
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let console_layer = debug.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["devpilot", "--project", "/tmp", "query", "-y", "add", "a", "route"]);
        assert_eq!(cli.project, Some(PathBuf::from("/tmp")));
        match cli.command {
            CliCommand::Query { yes, request } => {
                assert!(yes);
                assert_eq!(request.join(" "), "add a route");
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::parse_from(["devpilot", "monitor", "npm", "run", "dev"]);
        match cli.command {
            CliCommand::Monitor { command } => assert_eq!(command.join(" "), "npm run dev"),
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::parse_from(["devpilot", "--debug", "metadata", "update", "src/a.js"]);
        assert!(cli.debug);
        assert!(matches!(
            cli.command,
            CliCommand::Metadata { action: MetadataAction::Update { ref paths } } if paths.len() == 1
        ));
    }
}
