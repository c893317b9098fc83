//! # Orchestration
//!
//! The message workflow. Each work item runs exactly one step: resolve and
//! partition targets, dispatch one batch, or poll ephemeral group
//! provisioning. Steps are safe to replay; correctness under concurrent
//! batches comes from sticky conditional status writes and an atomic batch
//! counter rather than locks.
//!
//! ```text
//! identifying_targets ─► sending ─► awaiting_replies | success
//!                          │  ▲
//!                          ▼  │ (job overflow)
//!                  awaiting_provisioning
//!                  any unsettled status ─► failed
//! ```

pub mod actions;
pub mod batch_completion;
pub mod batch_partitioner;
pub mod bootstrap;
pub mod delivery;
pub mod provisioning;
pub mod target_resolver;
pub mod work_processor;
pub mod workflow;

pub use actions::{actions_for, WorkflowAction};
pub use batch_completion::BatchCompletion;
pub use batch_partitioner::{batch_count, batch_size_for, BatchPartitioner};
pub use bootstrap::{CommanderSystem, CommanderSystemHandle, FleetClients};
pub use delivery::{DeliveryOutcome, DeliveryStrategy, JobDelivery, ShadowDelivery, TopicDelivery};
pub use provisioning::{ProvisioningMonitor, ProvisioningState};
pub use target_resolver::TargetResolver;
pub use work_processor::WorkItemProcessor;
pub use workflow::{StepOutcome, WorkflowOrchestrator};
