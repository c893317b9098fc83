// Fully wired commander over in-memory storage, queue and fleet.

use super::fleet::InMemoryFleet;
use crate::config::{CommanderConfig, ConfigManager};
use crate::messaging::InMemoryWorkQueue;
use crate::orchestration::CommanderSystem;
use crate::storage::{InMemoryItemStore, ItemStore};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub struct TestSystem {
    pub system: CommanderSystem,
    pub fleet: Arc<InMemoryFleet>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub store: Arc<dyn ItemStore>,
}

impl TestSystem {
    /// Configuration from `config/commander/test.toml`
    pub fn test_config() -> Result<CommanderConfig> {
        let directory = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("config")
            .join("commander");
        let manager = ConfigManager::load_for_environment(&directory, "test")
            .context("Failed to load test configuration")?;
        Ok(manager.config().clone())
    }

    pub fn new() -> Result<Self> {
        Ok(Self::with_config(Self::test_config()?))
    }

    pub fn with_config(config: CommanderConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryItemStore::new()))
    }

    pub fn with_store(config: CommanderConfig, store: Arc<dyn ItemStore>) -> Self {
        let fleet = InMemoryFleet::new();
        let queue = Arc::new(InMemoryWorkQueue::new(config.queue.queue_name.clone()));
        let system = CommanderSystem::build(
            config,
            store.clone(),
            queue.clone(),
            InMemoryFleet::clients(&fleet),
        );
        Self {
            system,
            fleet,
            queue,
            store,
        }
    }

    /// Process work items until none is visible; returns how many ran
    pub async fn run_until_idle(&self) -> Result<usize> {
        let processed = self
            .system
            .processor
            .process_available()
            .await
            .context("Work queue receive failed")?;
        debug!(processed, remaining = self.queue.len(), "Test system idle");
        Ok(processed)
    }
}
