//! # Commander Bootstrap
//!
//! Composes the object graph once at process start: storage, queue and
//! fleet clients are injected into every component by constructor, and the
//! result is a plain struct. [`CommanderSystem::start`] spawns the work item
//! processor and returns a handle that stops it.

use super::batch_completion::BatchCompletion;
use super::batch_partitioner::BatchPartitioner;
use super::delivery::{JobDelivery, ShadowDelivery, TopicDelivery};
use super::provisioning::ProvisioningMonitor;
use super::target_resolver::TargetResolver;
use super::work_processor::WorkItemProcessor;
use super::workflow::WorkflowOrchestrator;
use crate::config::CommanderConfig;
use crate::correlation::ResponseCorrelator;
use crate::error::{CommanderError, CommanderResult};
use crate::fleet::{BulkProvisioner, DevicePublisher, FleetDirectory, JobClient, ShadowClient};
use crate::messaging::{PgWorkQueue, WorkQueue};
use crate::repositories::{CommandRepository, MessageRepository};
use crate::services::{CommandService, MessageService};
use crate::storage::{ItemStore, PgItemStore, StorageDao};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// External fleet collaborators
#[derive(Clone)]
pub struct FleetClients {
    pub directory: Arc<dyn FleetDirectory>,
    pub provisioner: Arc<dyn BulkProvisioner>,
    pub publisher: Arc<dyn DevicePublisher>,
    pub shadows: Arc<dyn ShadowClient>,
    pub jobs: Arc<dyn JobClient>,
}

/// The fully wired command delivery engine
pub struct CommanderSystem {
    pub config: CommanderConfig,
    pub commands: Arc<CommandService>,
    pub messages: Arc<MessageService>,
    pub correlator: ResponseCorrelator,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub processor: Arc<WorkItemProcessor>,
    pub queue: Arc<dyn WorkQueue>,
}

impl CommanderSystem {
    pub fn build(
        config: CommanderConfig,
        store: Arc<dyn ItemStore>,
        queue: Arc<dyn WorkQueue>,
        fleet: FleetClients,
    ) -> Self {
        let dao = StorageDao::new(store, config.storage.clone());
        let command_repository = CommandRepository::new(dao.clone());
        let message_repository = MessageRepository::new(dao);
        let delivery = config.delivery.clone();

        let orchestrator = WorkflowOrchestrator::new(
            TargetResolver::new(fleet.directory.clone(), message_repository.clone()),
            BatchPartitioner::new(message_repository.clone(), queue.clone(), delivery.clone()),
            Arc::new(TopicDelivery::new(
                fleet.publisher.clone(),
                message_repository.clone(),
                delivery.clone(),
            )),
            Arc::new(ShadowDelivery::new(
                fleet.shadows.clone(),
                message_repository.clone(),
                delivery.clone(),
            )),
            Arc::new(JobDelivery::new(
                fleet.jobs.clone(),
                fleet.provisioner.clone(),
                message_repository.clone(),
                queue.clone(),
                delivery.clone(),
            )),
            ProvisioningMonitor::new(
                fleet.provisioner.clone(),
                message_repository.clone(),
                queue.clone(),
                delivery.clone(),
            ),
            BatchCompletion::new(message_repository.clone()),
            message_repository.clone(),
        );

        let commands = Arc::new(CommandService::new(
            command_repository.clone(),
            message_repository.clone(),
            queue.clone(),
            config.storage.clone(),
            config.deletion.clone(),
        ));
        let messages = Arc::new(MessageService::new(
            command_repository,
            message_repository.clone(),
            queue.clone(),
            config.storage.clone(),
            config.deletion.clone(),
        ));
        let correlator =
            ResponseCorrelator::new(message_repository, delivery.reply_topic_prefix.clone());
        let orchestrator = Arc::new(orchestrator);
        let processor = Arc::new(WorkItemProcessor::new(
            queue.clone(),
            orchestrator.clone(),
            commands.clone(),
            config.queue.clone(),
        ));

        info!(
            table = %config.storage.table_name,
            queue = %queue.queue_name(),
            "✅ Commander system assembled"
        );
        Self {
            config,
            commands,
            messages,
            correlator,
            orchestrator,
            processor,
            queue,
        }
    }

    /// Build over PostgreSQL storage and queue sharing one pool
    pub async fn connect_postgres(
        config: CommanderConfig,
        fleet: FleetClients,
    ) -> CommanderResult<Self> {
        config.validate()?;
        let store = PgItemStore::connect(&config.database, &config.storage.table_name).await?;
        let queue = PgWorkQueue::new(store.pool().clone(), config.queue.queue_name.clone())?;
        if config.database.run_migrations {
            queue.ensure_schema().await?;
        }
        Ok(Self::build(config, Arc::new(store), Arc::new(queue), fleet))
    }

    /// Spawn the work item processor
    pub fn start(&self) -> CommanderSystemHandle {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let processor = self.processor.clone();
        let join_handle = tokio::spawn(async move { processor.run(shutdown_receiver).await });
        info!("🚀 Commander work item processor spawned");
        CommanderSystemHandle {
            shutdown_sender: Some(shutdown_sender),
            join_handle: Some(join_handle),
        }
    }
}

/// Lifecycle handle for a running processor
pub struct CommanderSystemHandle {
    shutdown_sender: Option<watch::Sender<bool>>,
    join_handle: Option<JoinHandle<()>>,
}

impl CommanderSystemHandle {
    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    /// Signal shutdown and wait for the processor loop to exit
    pub async fn stop(&mut self) -> CommanderResult<()> {
        let Some(sender) = self.shutdown_sender.take() else {
            warn!("Commander system already stopped");
            return Ok(());
        };
        sender.send(true).map_err(|_| {
            CommanderError::Configuration("work item processor already exited".to_string())
        })?;
        info!("🛑 Commander system shutdown requested");
        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|e| CommanderError::Configuration(format!("processor task failed: {e}")))?;
        }
        Ok(())
    }
}
