use serde::{Deserialize, Serialize};
use std::fmt;

/// Message workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Initial state set at message creation
    #[default]
    IdentifyingTargets,
    /// Job overflow: waiting for an ephemeral group to be provisioned
    AwaitingProvisioning,
    /// Batches have been enqueued and are being dispatched
    Sending,
    /// All batches dispatched; replies are expected from devices
    AwaitingReplies,
    /// All batches dispatched without failure and no reply expected
    Success,
    /// At least one batch failed, or the workflow could not proceed
    Failed,
}

impl MessageStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Statuses that dispatch-side aggregation has already settled
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::AwaitingReplies | Self::Success | Self::Failed)
    }

    /// Batches are out and being counted
    pub fn is_dispatching(&self) -> bool {
        matches!(self, Self::Sending | Self::AwaitingProvisioning)
    }

    /// Whether the workflow may move from `self` to `next`
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (Failed, _) | (Success, _) => false,
            (_, Failed) => true,
            (IdentifyingTargets, Sending) => true,
            (Sending, AwaitingProvisioning) => true,
            (AwaitingProvisioning, Sending) => true,
            (Sending, AwaitingReplies) | (Sending, Success) => true,
            (AwaitingReplies, Success) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentifyingTargets => "identifying_targets",
            Self::AwaitingProvisioning => "awaiting_provisioning",
            Self::Sending => "sending",
            Self::AwaitingReplies => "awaiting_replies",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identifying_targets" => Ok(Self::IdentifyingTargets),
            "awaiting_provisioning" => Ok(Self::AwaitingProvisioning),
            "sending" => Ok(Self::Sending),
            "awaiting_replies" => Ok(Self::AwaitingReplies),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid message status: {s}")),
        }
    }
}

/// Delivery status of a single resolved target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
