//! # Message State Machine
//!
//! Status definitions for messages and their recipients plus the table of
//! permitted message transitions. Transitions only move forward; `failed` is
//! sticky and overrides every non-terminal status.

pub mod states;

pub use states::{MessageStatus, RecipientStatus};
