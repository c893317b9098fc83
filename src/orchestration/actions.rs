//! Workflow action selection.
//!
//! Given a message's stored status and its command's delivery method, the
//! orchestrator runs an ordered list of actions. Every combination outside
//! the table maps to [`WorkflowAction::InvalidTransition`], which fails the
//! message; replays of stale or corrupted work items land there.
//!
//! Job batches always pass the provisioning check first: while one batch
//! waits on its ephemeral group the message reads `awaiting_provisioning`,
//! but a batch that never overflowed has nothing to wait for.

use crate::models::DeliveryMethodType;
use crate::state_machine::MessageStatus;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowAction {
    ResolveTargets,
    PartitionBatches,
    TopicDispatch,
    ShadowDispatch,
    JobDispatch,
    ProvisioningCheck,
    CompleteBatch,
    InvalidTransition,
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveTargets => "resolve_targets",
            Self::PartitionBatches => "partition_batches",
            Self::TopicDispatch => "topic_dispatch",
            Self::ShadowDispatch => "shadow_dispatch",
            Self::JobDispatch => "job_dispatch",
            Self::ProvisioningCheck => "provisioning_check",
            Self::CompleteBatch => "complete_batch",
            Self::InvalidTransition => "invalid_transition",
        };
        f.write_str(name)
    }
}

/// Ordered actions for one workflow step
pub fn actions_for(status: MessageStatus, method: DeliveryMethodType) -> Vec<WorkflowAction> {
    use WorkflowAction::*;
    match (status, method) {
        (MessageStatus::IdentifyingTargets, _) => vec![ResolveTargets, PartitionBatches],
        (MessageStatus::Sending, DeliveryMethodType::Topic) => vec![TopicDispatch, CompleteBatch],
        (MessageStatus::Sending, DeliveryMethodType::Shadow) => vec![ShadowDispatch, CompleteBatch],
        (MessageStatus::Sending | MessageStatus::AwaitingProvisioning, DeliveryMethodType::Job) => {
            vec![ProvisioningCheck, JobDispatch, CompleteBatch]
        }
        _ => vec![InvalidTransition],
    }
}
