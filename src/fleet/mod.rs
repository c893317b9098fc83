//! # Fleet Services
//!
//! Seams to the external device fleet: directory lookups, bulk
//! provisioning, pub/sub publish, shadow updates and jobs. Production
//! deployments supply SDK-backed implementations; tests use
//! `test_helpers::InMemoryFleet` (behind the `test-helpers` feature).

pub mod arn;

use crate::models::{AbortConfig, PresignedUrlConfig, RolloutConfig, TargetSelection, TimeoutConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub use arn::ArnBuilder;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("Throttled calling {operation}")]
    Throttled { operation: String },

    #[error("Resource not found: {resource}")]
    ResourceNotFound { resource: String },
}

impl FleetError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn throttled(operation: impl Into<String>) -> Self {
        Self::Throttled {
            operation: operation.into(),
        }
    }

    pub fn resource_not_found(resource: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
        }
    }

    /// Error code recorded against a failed recipient
    pub fn code(&self) -> &str {
        match self {
            Self::Service { code, .. } => code,
            Self::Throttled { .. } => "ThrottlingException",
            Self::ResourceNotFound { .. } => "ResourceNotFoundException",
        }
    }
}

pub type FleetResult<T> = Result<T, FleetError>;

/// Names, groups and an optional index query to expand into device names
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListThingsRequest {
    pub thing_names: Vec<String>,
    pub thing_group_names: Vec<String>,
    pub query: Option<Value>,
}

impl ListThingsRequest {
    pub fn is_empty(&self) -> bool {
        self.thing_names.is_empty() && self.thing_group_names.is_empty() && self.query.is_none()
    }
}

#[async_trait]
pub trait FleetDirectory: Send + Sync {
    async fn list_things(&self, request: &ListThingsRequest) -> FleetResult<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkProvisionStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Cancelling,
}

impl BulkProvisionStatus {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Cancelling)
    }
}

impl fmt::Display for BulkProvisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Cancelling => "Cancelling",
        };
        f.write_str(s)
    }
}

/// Membership to provision into an ephemeral group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkProvisionRequest {
    pub thing_group_name: String,
    pub thing_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkProvisionTask {
    pub task_id: String,
    pub status: BulkProvisionStatus,
    pub message: Option<String>,
}

#[async_trait]
pub trait BulkProvisioner: Send + Sync {
    /// Start provisioning; returns the task id to poll
    async fn bulk_provision_things(
        &self,
        template_id: &str,
        request: &BulkProvisionRequest,
    ) -> FleetResult<String>;

    async fn get_bulk_provision_task(&self, task_id: &str) -> FleetResult<BulkProvisionTask>;
}

#[async_trait]
pub trait DevicePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value, qos: u8) -> FleetResult<()>;
}

#[async_trait]
pub trait ShadowClient: Send + Sync {
    async fn update_thing_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> FleetResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateJobRequest {
    pub job_id: String,
    pub targets: Vec<String>,
    pub document: Value,
    pub target_selection: TargetSelection,
    pub presigned_url_config: Option<PresignedUrlConfig>,
    pub abort_config: Option<AbortConfig>,
    pub rollout_config: Option<RolloutConfig>,
    pub timeout_config: Option<TimeoutConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedJob {
    pub job_id: String,
    pub job_arn: String,
}

#[async_trait]
pub trait JobClient: Send + Sync {
    /// Create a thing group, returning its ARN
    async fn create_thing_group(&self, group_name: &str) -> FleetResult<String>;

    /// Ids of registration tasks currently in `status`
    async fn list_thing_registration_tasks(
        &self,
        status: BulkProvisionStatus,
    ) -> FleetResult<Vec<String>>;

    async fn create_job(&self, request: &CreateJobRequest) -> FleetResult<CreatedJob>;
}
