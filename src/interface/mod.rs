//! # Interface Layer
//!
//! Terminal I/O and the handlers behind each CLI subcommand.

pub mod commands;
pub mod console;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::metadata_builder::{MetadataBuilder, MetadataUpdater};
use crate::application::relevance::LlmRelevanceFinder;
use crate::domain::config::AppConfig;
use crate::domain::traits::LlmProvider;
use crate::infrastructure::llm::Client;
use crate::infrastructure::metadata::{MetadataStore, SharedMetadata};
use crate::infrastructure::tools::executor::{CommandExecutor, SharedExecutor};

/// Everything a command handler needs, built once per invocation.
pub struct Services {
    pub config: AppConfig,
    pub root: PathBuf,
    pub llm: Arc<dyn LlmProvider>,
    pub finder: Arc<LlmRelevanceFinder>,
    pub metadata: SharedMetadata,
    pub builder: Arc<MetadataBuilder>,
    pub updater: Arc<MetadataUpdater>,
    pub executor: SharedExecutor,
}

impl Services {
    pub fn new(root: &Path, config: AppConfig) -> Result<Self> {
        let llm: Arc<dyn LlmProvider> =
            Arc::new(Client::new(config.llm.clone()).context("Invalid llm configuration")?);
        Self::with_llm(root, config, llm)
    }

    /// Wires the services around an already constructed model client.
    pub fn with_llm(root: &Path, config: AppConfig, llm: Arc<dyn LlmProvider>) -> Result<Self> {
        let metadata = MetadataStore::open(root.join(&config.metadata.file))?.shared();
        let builder = Arc::new(MetadataBuilder::new(
            llm.clone(),
            metadata.clone(),
            root,
            &config.metadata,
        ));
        let updater = Arc::new(MetadataUpdater::new(builder.clone()));
        let executor =
            CommandExecutor::new(root, &config.commands)?.with_metadata_hook(updater.clone());

        Ok(Self {
            finder: Arc::new(LlmRelevanceFinder::new(llm.clone(), root)),
            root: root.to_path_buf(),
            llm,
            metadata,
            builder,
            updater,
            executor: Arc::new(tokio::sync::Mutex::new(executor)),
            config,
        })
    }
}
