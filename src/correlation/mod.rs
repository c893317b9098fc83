//! # Reply Correlation
//!
//! Devices answer a dispatch on reply topics that embed the correlation id
//! minted for them. This module builds and parses those topics and matches
//! inbound replies back to the recipient that owns the correlation id.

pub mod reply_topic;
pub mod response_correlator;

pub use reply_topic::{parse_reply_topic, ParsedReplyTopic, ReplyTopics};
pub use response_correlator::ResponseCorrelator;
