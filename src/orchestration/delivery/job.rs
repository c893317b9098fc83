//! # Job Delivery
//!
//! Creates one fleet job per batch, targeting device and group ARNs. When a
//! batch holds more ARNs than a single job accepts, the devices are moved
//! into an ephemeral thing group instead:
//!
//! 1. refuse if another bulk registration task is still in progress
//! 2. enter `awaiting_provisioning`, unless the message has settled
//! 3. create `{prefix}-{messageId}-{batchIndex}` and start bulk
//!    provisioning into it
//! 4. carry the task and group on the batch work item and re-enqueue it
//!    with the configured poll delay
//!
//! Once provisioning completes the job targets the ephemeral group's ARN
//! plus any group targets. Job status is tracked per job, so every target of
//! a batch shares one correlation id and job id. A redelivered batch whose
//! targets already hold a job id does not create another.

use super::{build_payload, failure_message, mint_correlation_id, DeliveryOutcome, DeliveryStrategy};
use crate::config::DeliveryConfig;
use crate::error::{CommanderError, CommanderResult};
use crate::fleet::{
    ArnBuilder, BulkProvisionRequest, BulkProvisionStatus, BulkProvisioner, CreateJobRequest,
    JobClient,
};
use crate::messaging::{WorkItem, WorkQueue};
use crate::models::{Command, DeliveryMethod, JobDeliveryMethod, Message, TargetType};
use crate::state_machine::RecipientStatus;
use crate::repositories::MessageRepository;
use crate::state_machine::MessageStatus;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct JobDelivery {
    jobs: Arc<dyn JobClient>,
    provisioner: Arc<dyn BulkProvisioner>,
    messages: MessageRepository,
    queue: Arc<dyn WorkQueue>,
    arns: ArnBuilder,
    config: DeliveryConfig,
}

impl JobDelivery {
    pub fn new(
        jobs: Arc<dyn JobClient>,
        provisioner: Arc<dyn BulkProvisioner>,
        messages: MessageRepository,
        queue: Arc<dyn WorkQueue>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            jobs,
            provisioner,
            messages,
            queue,
            arns: ArnBuilder::from_config(&config),
            config,
        }
    }

    /// Group name for one batch of a message
    pub fn ephemeral_group_name(&self, message_id: &str, batch_index: u64) -> String {
        format!(
            "{}-{message_id}-{batch_index}",
            self.config.ephemeral_group_prefix
        )
    }

    /// ARNs the job would target if created directly
    fn direct_targets(&self, message: &Message) -> Vec<String> {
        message
            .resolved_targets
            .iter()
            .map(|target| match target.target_type {
                TargetType::Device => self.arns.thing(&target.id),
                TargetType::Group => self.arns.thing_group(&target.id),
            })
            .collect()
    }

    /// ARNs once devices have been provisioned into the ephemeral group
    fn grouped_targets(&self, message: &Message, group_name: &str) -> Vec<String> {
        let mut arns = vec![self.arns.thing_group(group_name)];
        arns.extend(
            message
                .resolved_targets
                .iter()
                .filter(|t| t.target_type == TargetType::Group)
                .map(|t| self.arns.thing_group(&t.id)),
        );
        arns
    }

    #[instrument(skip_all, fields(message_id = %message.id, batch_index = ?message.batch_index))]
    async fn start_ephemeral_group(
        &self,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<DeliveryOutcome> {
        let running = self
            .jobs
            .list_thing_registration_tasks(BulkProvisionStatus::InProgress)
            .await?;
        if !running.is_empty() {
            return Err(CommanderError::Conflict(format!(
                "bulk provisioning task(s) already in progress: {}",
                running.join(", ")
            )));
        }

        // A failed message keeps its status while its remaining batches finish
        if message.status != MessageStatus::Failed
            && !self.messages.start_provisioning(&message.id).await?
        {
            return Err(CommanderError::Provisioning(format!(
                "message {} settled before provisioning started",
                message.id
            )));
        }

        let group_name = self.ephemeral_group_name(&message.id, message.batch_index.unwrap_or(0));
        self.jobs.create_thing_group(&group_name).await?;

        let thing_names: Vec<String> = message
            .resolved_targets
            .iter()
            .filter(|t| t.target_type == TargetType::Device)
            .map(|t| t.id.clone())
            .collect();
        let task_id = self
            .provisioner
            .bulk_provision_things(
                &self.config.bulk_provisioning_template_id,
                &BulkProvisionRequest {
                    thing_group_name: group_name.clone(),
                    thing_names,
                },
            )
            .await?;

        if message.status != MessageStatus::Failed {
            message.status = MessageStatus::AwaitingProvisioning;
        }
        message.bulk_provisioning_task_id = Some(task_id.clone());
        message.ephemeral_group_name = Some(group_name.clone());

        self.queue
            .send(
                &WorkItem::message_step(message.clone(), command.clone()),
                Some(self.config.provisioning_poll_delay()),
            )
            .await?;
        info!(
            group = %group_name,
            task_id = %task_id,
            devices = message.resolved_targets.len(),
            "📋 Ephemeral group provisioning started"
        );
        Ok(DeliveryOutcome::Deferred)
    }

    async fn create_job(
        &self,
        message: &mut Message,
        command: &Command,
        job: &JobDeliveryMethod,
        targets: Vec<String>,
    ) -> CommanderResult<DeliveryOutcome> {
        let correlation_id = mint_correlation_id();
        let document = json!({
            "correlationId": correlation_id,
            "operation": command.operation,
            "payload": build_payload(command.payload_template.as_deref(), &message.payload_param_values),
        });
        let request = CreateJobRequest {
            job_id: Uuid::new_v4().to_string(),
            targets,
            document,
            target_selection: job.target_selection,
            presigned_url_config: job.presigned_url_config.clone(),
            abort_config: job.abort_config.clone(),
            rollout_config: job.job_executions_rollout_config.clone(),
            timeout_config: job.timeout_config.clone(),
        };

        match self.jobs.create_job(&request).await {
            Ok(created) => {
                info!(
                    message_id = %message.id,
                    job_id = %created.job_id,
                    targets = request.targets.len(),
                    "✅ Job created"
                );
                for target in message.resolved_targets.iter_mut() {
                    target.mark_success(Some(correlation_id.clone()));
                    target.job_id = Some(created.job_id.clone());
                }
            }
            Err(error) => {
                warn!(message_id = %message.id, error = %error, "⚠️ Job creation failed");
                let reason = failure_message(&error);
                for target in message.resolved_targets.iter_mut() {
                    target.mark_failed(reason.clone());
                }
            }
        }

        self.messages
            .save_recipients(&message.id, &message.resolved_targets)
            .await?;
        Ok(DeliveryOutcome::Dispatched)
    }
}

#[async_trait]
impl DeliveryStrategy for JobDelivery {
    #[instrument(skip_all, fields(message_id = %message.id, batch_size = message.resolved_targets.len()))]
    async fn process(
        &self,
        message: &mut Message,
        command: &Command,
    ) -> CommanderResult<DeliveryOutcome> {
        let DeliveryMethod::Job(job) = &command.delivery_method else {
            return Err(CommanderError::UnsupportedMessageType {
                status: message.status.to_string(),
                delivery_method: command.delivery_method.method_type().to_string(),
            });
        };

        if message.resolved_targets.iter().any(|t| {
            t.status == RecipientStatus::Success && t.job_id.is_some()
        }) {
            info!("Batch job already created; skipping");
            return Ok(DeliveryOutcome::Dispatched);
        }

        if let Some(group_name) = message.ephemeral_group_name.clone() {
            let targets = self.grouped_targets(message, &group_name);
            return self.create_job(message, command, job, targets).await;
        }

        let targets = self.direct_targets(message);
        if targets.len() > self.config.max_job_targets {
            info!(
                targets = targets.len(),
                max_job_targets = self.config.max_job_targets,
                "Job target ceiling exceeded; using an ephemeral group"
            );
            return self.start_ephemeral_group(message, command).await;
        }
        self.create_job(message, command, job, targets).await
    }
}
