//! # Services
//!
//! Caller-facing operations over commands and messages. Services validate
//! input, persist through the repositories and hand asynchronous work to the
//! queue; they never dispatch to devices themselves.

pub mod command_service;
pub mod message_service;

pub use command_service::CommandService;
pub use message_service::MessageService;

/// Caller-supplied page size, falling back to the configured default
pub(crate) fn page_count(requested: Option<usize>, default: usize) -> usize {
    requested.filter(|count| *count > 0).unwrap_or(default).max(1)
}
