//! # Domain Models
//!
//! Commands, messages, recipients and replies as exchanged with callers.
//! Storage mapping lives in the repositories; these types only carry data
//! and small invariant-preserving helpers.

pub mod command;
pub mod message;
pub mod pagination;
pub mod reply;

pub use command::{
    AbortConfig, AbortCriteria, Command, CommandPatch, DeliveryMethod, DeliveryMethodType,
    ExponentialRolloutRate, JobDeliveryMethod, NewCommand, PresignedUrlConfig, RolloutConfig,
    ShadowDeliveryMethod, TargetSelection, TimeoutConfig, TopicDeliveryMethod, DEVICE_NAME_TOKEN,
};
pub use message::{
    AwsIotTargets, Message, NewMessage, Recipient, TargetType, Targets, ThingGroupTarget,
};
pub use pagination::{
    CommandListPaginationKey, MessageListPaginationKey, Page, RecipientListPaginationKey,
    ReplyListPaginationKey,
};
pub use reply::{Reply, ReplyAction};
